use std::sync::Arc;

use campus_portal::workflows::admissions::{
    AdmissionsService, ApplicationStatus, ApplicationSubmission, CertificateRequest,
    CertificateStatus, DiskFileStore, DocumentUpload, FixedClock, InMemoryPortalStore, NewStudent,
    NewTicket, PortalPolicy, ReviewDecision, StudyLevel, TicketStatus,
};
use chrono::{TimeZone, Utc};

fn student(nationality: &str) -> NewStudent {
    NewStudent {
        email: "karim@example.com".to_string(),
        full_name: "Karim Adel".to_string(),
        phone: Some("+20 100 000 0000".to_string()),
        nationality: nationality.to_string(),
    }
}

#[test]
fn student_journey_survives_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot = dir.path().join("portal.json");
    let uploads = dir.path().join("uploads");
    let clock = Arc::new(FixedClock::at(
        Utc.with_ymd_and_hms(2026, 2, 10, 8, 30, 0).unwrap(),
    ));

    let build = || {
        AdmissionsService::new(
            Arc::new(InMemoryPortalStore::open(&snapshot).expect("snapshot opens")),
            Arc::new(DiskFileStore::new(&uploads).expect("upload dir")),
            PortalPolicy::default(),
        )
        .with_clock(clock.clone())
    };

    let (student_principal, application_code, document_path) = {
        let service = build();
        let admin = service
            .ensure_admin("admin@example.com", "Registrar")
            .expect("admin seeded");
        let student = service
            .register_student(student("Libyan"))
            .expect("student registers");

        let application = service
            .submit_application(
                student.principal(),
                ApplicationSubmission {
                    program: "Master Business Administration".to_string(),
                    level: StudyLevel::Masters,
                },
            )
            .expect("application submitted");
        let document = service
            .upload_document(
                student.principal(),
                DocumentUpload {
                    name: "Bachelor transcript".to_string(),
                    file_name: "transcript.pdf".to_string(),
                    application: Some(application.code.clone()),
                },
                b"%PDF-1.4",
            )
            .expect("document uploaded");
        service
            .review_application(admin.principal(), &application.code, ReviewDecision::Approve)
            .expect("approved");

        let name = document
            .locator
            .0
            .strip_prefix("uploads/")
            .expect("relative locator")
            .to_string();
        (student.principal(), application.code, uploads.join(name))
    };

    assert!(document_path.exists());

    let service = build();
    let admin = service
        .ensure_admin("admin@example.com", "Registrar")
        .expect("admin already stored");

    let receipt = service
        .record_application_payment(student_principal, &application_code, "card")
        .expect("payment after restart");
    assert_eq!(receipt.payment.amount, 1500);

    let record = service
        .generate_student_id(admin.principal(), &application_code)
        .expect("student id generated");
    assert_eq!(record.code.0, "2026-INT-MBA-0001");
    assert_eq!(
        service
            .application(student_principal, &application_code)
            .expect("readable")
            .status,
        ApplicationStatus::Enrolled
    );

    let certificate = service
        .request_certificate(
            student_principal,
            CertificateRequest {
                certificate_type: "Enrollment".to_string(),
                purpose: "Residence permit".to_string(),
                copies: 2,
            },
        )
        .expect("certificate requested");
    service
        .record_certificate_payment(student_principal, &certificate.code, "card")
        .expect("certificate paid");
    let ready = service
        .mark_certificate_ready(admin.principal(), &certificate.code, None)
        .expect("ready");
    assert_eq!(ready.status, CertificateStatus::ReadyForPickup);

    let ticket = service
        .open_ticket(
            student_principal,
            NewTicket {
                subject: "ID card".to_string(),
                message: "When can I collect my card?".to_string(),
            },
        )
        .expect("ticket opened");
    service
        .reply_to_ticket(admin.principal(), &ticket.code, "Next Sunday.")
        .expect("staff reply");
    let closed = service
        .close_ticket(student_principal, &ticket.code)
        .expect("closed");
    assert_eq!(closed.status, TicketStatus::Closed);

    let documents = service.documents(student_principal).expect("documents");
    assert_eq!(documents.len(), 1);
    service
        .delete_document(student_principal, documents[0].id)
        .expect("document deleted");
    assert!(!document_path.exists());

    let feed = service.notifications(student_principal).expect("feed");
    assert_eq!(feed.unread, 6);
}
