use std::sync::Arc;

use super::common::*;
use crate::workflows::admissions::domain::{ApplicationCode, DocumentId, DocumentUpload, NewStudent};
use crate::workflows::admissions::{
    AdmissionsService, FileStoreError, InMemoryPortalStore, PortalPolicy, WorkflowError,
};

fn upload(file_name: &str, application: Option<ApplicationCode>) -> DocumentUpload {
    DocumentUpload {
        name: "National ID".to_string(),
        file_name: file_name.to_string(),
        application,
    }
}

#[test]
fn upload_stores_bytes_and_records_document() {
    let h = harness();
    let student = h.student("doc@example.com", "Egyptian");
    let application = h.submit(&student, "Computer Science");

    let document = h
        .service
        .upload_document(
            student.principal(),
            upload("id card.PDF", Some(application.code.clone())),
            b"%PDF-1.7",
        )
        .expect("upload succeeds");

    assert_eq!(document.owner, student.id);
    assert_eq!(document.application, Some(application.code));
    assert_eq!(
        document.locator.0,
        format!("uploads/{}_20250901090000_id_card.PDF", student.id)
    );
    assert!(h.files.contains(&document.locator));
    assert_eq!(h.service.documents(student.principal()).expect("listing").len(), 1);
}

#[test]
fn upload_rejects_disallowed_extensions() {
    let h = harness();
    let student = h.student("doc@example.com", "Egyptian");

    for name in ["payload.exe", "no-extension"] {
        let err = h
            .service
            .upload_document(student.principal(), upload(name, None), b"MZ")
            .expect_err("extension rejected");
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }
    assert!(h.files.is_empty());
}

#[test]
fn failed_record_insert_removes_stored_bytes() {
    let h = harness();
    let owner = h.student("owner@example.com", "Egyptian");
    let other = h.student("other@example.com", "Egyptian");
    let application = h.submit(&owner, "Computer Science");

    let err = h
        .service
        .upload_document(
            other.principal(),
            upload("id.png", Some(application.code)),
            b"\x89PNG",
        )
        .expect_err("foreign application");

    assert!(matches!(err, WorkflowError::Unauthorized { .. }));
    assert!(h.files.is_empty());
}

#[test]
fn file_store_failure_surfaces_before_any_record() {
    let store = Arc::new(InMemoryPortalStore::new());
    let service = AdmissionsService::new(
        store,
        Arc::new(BrokenFileStore),
        PortalPolicy::default(),
    );
    let student = service
        .register_student(NewStudent {
            email: "doc@example.com".to_string(),
            full_name: "Doc".to_string(),
            phone: None,
            nationality: "Egyptian".to_string(),
        })
        .expect("registers");

    let err = service
        .upload_document(student.principal(), upload("id.pdf", None), b"%PDF")
        .expect_err("disk unavailable");
    assert!(matches!(err, WorkflowError::FileStore(FileStoreError::Io(_))));
    assert!(service
        .documents(student.principal())
        .expect("listing")
        .is_empty());
}

#[test]
fn delete_removes_record_and_bytes() {
    let h = harness();
    let student = h.student("doc@example.com", "Egyptian");
    let document = h
        .service
        .upload_document(student.principal(), upload("id.pdf", None), b"%PDF")
        .expect("upload succeeds");

    h.service
        .delete_document(student.principal(), document.id)
        .expect("delete succeeds");

    assert!(!h.files.contains(&document.locator));
    assert!(h.service.documents(student.principal()).expect("listing").is_empty());
}

#[test]
fn delete_succeeds_when_bytes_are_already_gone() {
    let h = harness();
    let student = h.student("doc@example.com", "Egyptian");
    let document = h
        .service
        .upload_document(student.principal(), upload("id.pdf", None), b"%PDF")
        .expect("upload succeeds");
    h.files.evict(&document.locator);

    let removed = h
        .service
        .delete_document(student.principal(), document.id)
        .expect("record still removed");

    assert_eq!(removed.id, document.id);
    assert!(h.service.documents(student.principal()).expect("listing").is_empty());
}

#[test]
fn delete_is_owner_only() {
    let h = harness();
    let owner = h.student("owner@example.com", "Egyptian");
    let other = h.student("other@example.com", "Egyptian");
    let document = h
        .service
        .upload_document(owner.principal(), upload("id.pdf", None), b"%PDF")
        .expect("upload succeeds");

    let err = h
        .service
        .delete_document(other.principal(), document.id)
        .expect_err("not the owner");
    assert!(matches!(err, WorkflowError::Unauthorized { .. }));
    assert!(h.files.contains(&document.locator));

    let missing = h
        .service
        .delete_document(owner.principal(), DocumentId(404))
        .expect_err("unknown document");
    assert!(matches!(missing, WorkflowError::NotFound { .. }));
}

#[test]
fn delete_keeps_going_when_the_file_store_fails() {
    let h = harness();
    let student = h.student("doc@example.com", "Egyptian");
    let document = h
        .service
        .upload_document(student.principal(), upload("id.pdf", None), b"%PDF")
        .expect("upload succeeds");
    let read_only = AdmissionsService::new(
        h.store.clone(),
        Arc::new(BrokenFileStore),
        PortalPolicy::default(),
    );

    let removed = read_only
        .delete_document(student.principal(), document.id)
        .expect("record removed despite disk error");

    assert_eq!(removed.id, document.id);
    assert!(h.service.documents(student.principal()).expect("listing").is_empty());
    assert!(h.files.contains(&document.locator));
}

#[test]
fn unregistered_uploader_is_not_found_and_stores_nothing() {
    let h = harness();

    let err = h
        .service
        .upload_document(stranger(), upload("id.pdf", None), b"%PDF")
        .expect_err("unknown uploader");

    assert!(matches!(err, WorkflowError::NotFound { entity: "user", .. }));
    assert!(h.files.is_empty());
}
