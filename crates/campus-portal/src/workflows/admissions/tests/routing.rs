use axum::body::Body;
use axum::http::{header, request, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::admissions::domain::{CertificateRequest, Principal, User};
use crate::workflows::admissions::router::{ROLE_HEADER, USER_HEADER};
use crate::workflows::admissions::{portal_router, IdentifierKind, WorkflowError};

fn router(h: &Harness) -> Router {
    portal_router(h.service.clone())
}

fn as_principal(builder: request::Builder, principal: Principal) -> request::Builder {
    builder
        .header(USER_HEADER, principal.user_id.0.to_string())
        .header(ROLE_HEADER, principal.role.label())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("route executes");
    let status = response.status();
    (status, read_json_body(response).await)
}

fn post_json(uri: &str, principal: Option<Principal>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(principal) = principal {
        builder = as_principal(builder, principal);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
        .expect("request builds")
}

fn get(uri: &str, principal: Principal) -> Request<Body> {
    as_principal(Request::get(uri), principal)
        .body(Body::empty())
        .expect("request builds")
}

fn student_of(h: &Harness) -> User {
    h.student("http@example.com", "Egyptian")
}

#[tokio::test]
async fn registration_is_open_and_returns_created() {
    let h = harness();
    let (status, body) = send(
        router(&h),
        post_json(
            "/api/v1/students",
            None,
            json!({
                "email": "new@example.com",
                "full_name": "New Student",
                "nationality": "Kenyan",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["nationality_class"], "international");
    assert_eq!(body["role"], "student");
}

#[tokio::test]
async fn missing_identity_headers_are_unauthorized() {
    let h = harness();
    let request = Request::get("/api/v1/applications")
        .body(Body::empty())
        .expect("request builds");

    let (status, body) = send(router(&h), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().expect("message").contains(USER_HEADER));
}

#[tokio::test]
async fn application_review_flow_maps_errors_to_statuses() {
    let h = harness();
    let student = student_of(&h);

    let (status, created) = send(
        router(&h),
        post_json(
            "/api/v1/applications",
            Some(student.principal()),
            json!({ "program": "Computer Science", "level": "masters" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["code"], "APP-001");
    assert_eq!(created["status"], "pending_review");

    let review = |principal| {
        post_json(
            "/api/v1/applications/APP-001/review",
            Some(principal),
            json!({ "decision": "approve" }),
        )
    };

    let (status, _) = send(router(&h), review(student.principal())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = send(router(&h), review(h.admin())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "documents_approved");

    let (status, _) = send(router(&h), review(h.admin())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, fee) = send(
        router(&h),
        get("/api/v1/applications/APP-001/fee", student.principal()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fee["amount"], 600);

    let (status, receipt) = send(
        router(&h),
        post_json(
            "/api/v1/applications/APP-001/payments",
            Some(student.principal()),
            json!({ "method": "card" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["record"]["payment_status"], "paid");

    let (status, student_id) = send(
        router(&h),
        post_json(
            "/api/v1/applications/APP-001/student-id",
            Some(h.admin()),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(student_id["code"], "2025-LOC-CS-0001");
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let h = harness();
    let student = student_of(&h);

    let (status, _) = send(
        router(&h),
        get("/api/v1/tickets/TKT-404", student.principal()),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_input_is_unprocessable() {
    let h = harness();
    let student = student_of(&h);

    let (status, _) = send(
        router(&h),
        post_json(
            "/api/v1/tickets",
            Some(student.principal()),
            json!({ "subject": "", "message": "hello" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn uploads_take_metadata_from_query_and_bytes_from_body() {
    let h = harness();
    let student = student_of(&h);

    let request = as_principal(
        Request::post("/api/v1/documents?name=Passport&file_name=passport.jpg"),
        student.principal(),
    )
    .header(header::CONTENT_TYPE, "application/octet-stream")
    .body(Body::from(vec![0xFF, 0xD8, 0xFF]))
    .expect("request builds");
    let (status, document) = send(router(&h), request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(document["name"], "Passport");
    assert_eq!(h.files.len(), 1);

    let id = document["id"].as_u64().expect("numeric id");
    let request = as_principal(
        Request::delete(format!("/api/v1/documents/{id}")),
        student.principal(),
    )
    .body(Body::empty())
    .expect("request builds");
    let (status, _) = send(router(&h), request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(h.files.is_empty());
}

#[tokio::test]
async fn notifications_can_be_marked_read_over_http() {
    let h = harness();
    let student = student_of(&h);
    h.submit(&student, "Computer Science");

    let (status, body) = send(
        router(&h),
        post_json("/api/v1/notifications/read", Some(h.admin()), json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["marked_read"], 1);
}

#[tokio::test]
async fn certificate_ready_accepts_missing_body() {
    let h = harness();
    let student = student_of(&h);
    let certificate = h
        .service
        .request_certificate(
            student.principal(),
            CertificateRequest {
                certificate_type: "Enrollment".to_string(),
                purpose: "Bank".to_string(),
                copies: 1,
            },
        )
        .expect("requested");
    h.service
        .record_certificate_payment(student.principal(), &certificate.code, "card")
        .expect("paid");

    let request = as_principal(
        Request::post(format!("/api/v1/certificates/{}/ready", certificate.code)),
        h.admin(),
    )
    .body(Body::empty())
    .expect("request builds");
    let (status, body) = send(router(&h), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready_for_pickup");
}

#[tokio::test]
async fn exhausted_identifiers_are_service_unavailable() {
    let response = WorkflowError::GenerationFailed {
        kind: IdentifierKind::Ticket,
        attempts: 5,
    }
    .into_response();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json_body(response).await;
    assert_eq!(
        body["error"],
        "could not allocate a unique ticket identifier after 5 attempt(s)"
    );
}

#[tokio::test]
async fn profile_reads_and_updates_through_put() {
    let h = harness();
    let student = student_of(&h);
    let request = as_principal(Request::put("/api/v1/profile"), student.principal())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({ "full_name": "Renamed Student", "phone": "0100" }))
                .expect("serialize body"),
        ))
        .expect("request builds");

    let (status, body) = send(router(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["full_name"], "Renamed Student");

    let (status, body) = send(router(&h), get("/api/v1/profile", student.principal())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phone"], "0100");
    assert_eq!(body["email"], "http@example.com");
}
