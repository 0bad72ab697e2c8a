use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    ApplicationCode, ApplicationSubmission, CertificateCode, CertificateRequest, DocumentId,
    DocumentUpload, FundedEntity, NewStudent, NewTicket, NotificationId, Principal,
    ProfileUpdate, ReviewDecision, Role, TicketCode, UserId,
};
use super::files::FileStore;
use super::repository::PortalStore;
use super::service::{AdmissionsService, WorkflowError};

pub const USER_HEADER: &str = "x-portal-user";
pub const ROLE_HEADER: &str = "x-portal-role";

type Service<S, F> = State<Arc<AdmissionsService<S, F>>>;

/// JSON endpoints for the admissions workflow, mounted under `/api/v1`.
pub fn portal_router<S, F>(service: Arc<AdmissionsService<S, F>>) -> Router
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    Router::new()
        .route("/api/v1/students", post(register_handler::<S, F>))
        .route(
            "/api/v1/profile",
            get(profile_handler::<S, F>).put(update_profile_handler::<S, F>),
        )
        .route("/api/v1/overview", get(overview_handler::<S, F>))
        .route("/api/v1/admin/dashboard", get(dashboard_handler::<S, F>))
        .route(
            "/api/v1/applications",
            post(submit_handler::<S, F>).get(applications_handler::<S, F>),
        )
        .route(
            "/api/v1/applications/:code",
            get(application_handler::<S, F>),
        )
        .route(
            "/api/v1/applications/:code/review",
            post(review_handler::<S, F>),
        )
        .route(
            "/api/v1/applications/:code/fee",
            get(application_fee_handler::<S, F>),
        )
        .route(
            "/api/v1/applications/:code/payments",
            post(application_payment_handler::<S, F>).get(application_payments_handler::<S, F>),
        )
        .route(
            "/api/v1/applications/:code/student-id",
            post(student_id_handler::<S, F>),
        )
        .route(
            "/api/v1/enrollments",
            get(enrolled_handler::<S, F>),
        )
        .route(
            "/api/v1/enrollments/pending",
            get(pending_enrollments_handler::<S, F>),
        )
        .route(
            "/api/v1/documents",
            post(upload_handler::<S, F>).get(documents_handler::<S, F>),
        )
        .route("/api/v1/documents/:id", delete(delete_document_handler::<S, F>))
        .route(
            "/api/v1/certificates",
            post(request_certificate_handler::<S, F>).get(certificates_handler::<S, F>),
        )
        .route(
            "/api/v1/certificates/:code",
            get(certificate_handler::<S, F>),
        )
        .route(
            "/api/v1/certificates/:code/fee",
            get(certificate_fee_handler::<S, F>),
        )
        .route(
            "/api/v1/certificates/:code/payments",
            post(certificate_payment_handler::<S, F>).get(certificate_payments_handler::<S, F>),
        )
        .route(
            "/api/v1/certificates/:code/ready",
            post(certificate_ready_handler::<S, F>),
        )
        .route(
            "/api/v1/tickets",
            post(open_ticket_handler::<S, F>).get(tickets_handler::<S, F>),
        )
        .route("/api/v1/tickets/:code", get(ticket_handler::<S, F>))
        .route(
            "/api/v1/tickets/:code/replies",
            post(reply_handler::<S, F>),
        )
        .route(
            "/api/v1/tickets/:code/close",
            post(close_ticket_handler::<S, F>),
        )
        .route(
            "/api/v1/notifications",
            get(notifications_handler::<S, F>),
        )
        .route(
            "/api/v1/notifications/read",
            post(read_all_handler::<S, F>),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(read_one_handler::<S, F>),
        )
        .with_state(service)
}

/// Caller identity forwarded by the authenticating proxy.
#[async_trait]
impl<St> FromRequestParts<St> for Principal
where
    St: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        };

        let user_id = header(USER_HEADER)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(UserId);
        let role = header(ROLE_HEADER).and_then(Role::parse);

        match (user_id, role) {
            (Some(user_id), Some(role)) => Ok(Principal { user_id, role }),
            _ => Err(error_body(
                StatusCode::UNAUTHORIZED,
                format!("missing or malformed {USER_HEADER} / {ROLE_HEADER} headers"),
            )),
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
            WorkflowError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkflowError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::DuplicateIdentifier(_) | WorkflowError::GenerationFailed { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            WorkflowError::Persistence(_) | WorkflowError::FileStore(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_body(status, self.to_string())
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn respond<T: Serialize>(status: StatusCode, outcome: Result<T, WorkflowError>) -> Response {
    match outcome {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewBody {
    decision: ReviewDecision,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentBody {
    method: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReadyBody {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplyBody {
    message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadQuery {
    name: String,
    file_name: String,
    #[serde(default)]
    application: Option<String>,
}

pub(crate) async fn register_handler<S, F>(
    State(service): Service<S, F>,
    Json(student): Json<NewStudent>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::CREATED, service.register_student(student))
}

pub(crate) async fn profile_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.user(principal, principal.user_id))
}

pub(crate) async fn update_profile_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Json(update): Json<ProfileUpdate>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.update_profile(principal, update))
}

pub(crate) async fn overview_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.student_overview(principal))
}

pub(crate) async fn dashboard_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.admin_dashboard(principal))
}

pub(crate) async fn submit_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Json(submission): Json<ApplicationSubmission>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.submit_application(principal, submission),
    )
}

pub(crate) async fn applications_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.applications(principal))
}

pub(crate) async fn application_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.application(principal, &ApplicationCode(code)),
    )
}

pub(crate) async fn review_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
    Json(body): Json<ReviewBody>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.review_application(principal, &ApplicationCode(code), body.decision),
    )
}

pub(crate) async fn application_fee_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let code = ApplicationCode(code);
    let outcome = service
        .application_fee_for(principal, &code)
        .map(|amount| json!({ "application": code, "amount": amount }));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn application_payment_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
    Json(body): Json<PaymentBody>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.record_application_payment(principal, &ApplicationCode(code), &body.method),
    )
}

pub(crate) async fn application_payments_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let funds = FundedEntity::Application(ApplicationCode(code));
    respond(StatusCode::OK, service.payments_for(principal, &funds))
}

pub(crate) async fn student_id_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.generate_student_id(principal, &ApplicationCode(code)),
    )
}

pub(crate) async fn enrolled_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.enrolled_students(principal))
}

pub(crate) async fn pending_enrollments_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.pending_enrollments(principal))
}

pub(crate) async fn upload_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Query(query): Query<UploadQuery>,
    bytes: Bytes,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let upload = DocumentUpload {
        name: query.name,
        file_name: query.file_name,
        application: query
            .application
            .filter(|code| !code.trim().is_empty())
            .map(ApplicationCode),
    };
    respond(
        StatusCode::CREATED,
        service.upload_document(principal, upload, &bytes),
    )
}

pub(crate) async fn documents_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.documents(principal))
}

pub(crate) async fn delete_document_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(id): Path<u64>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.delete_document(principal, DocumentId(id)),
    )
}

pub(crate) async fn request_certificate_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Json(request): Json<CertificateRequest>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.request_certificate(principal, request),
    )
}

pub(crate) async fn certificates_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.certificates(principal))
}

pub(crate) async fn certificate_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.certificate(principal, &CertificateCode(code)),
    )
}

pub(crate) async fn certificate_fee_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let code = CertificateCode(code);
    let outcome = service
        .certificate_fee_for(principal, &code)
        .map(|amount| json!({ "certificate": code, "amount": amount }));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn certificate_payment_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
    Json(body): Json<PaymentBody>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.record_certificate_payment(principal, &CertificateCode(code), &body.method),
    )
}

pub(crate) async fn certificate_payments_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let funds = FundedEntity::Certificate(CertificateCode(code));
    respond(StatusCode::OK, service.payments_for(principal, &funds))
}

pub(crate) async fn certificate_ready_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
    body: Option<Json<ReadyBody>>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let notes = body.and_then(|Json(body)| body.notes);
    respond(
        StatusCode::OK,
        service.mark_certificate_ready(principal, &CertificateCode(code), notes),
    )
}

pub(crate) async fn open_ticket_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Json(ticket): Json<NewTicket>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::CREATED, service.open_ticket(principal, ticket))
}

pub(crate) async fn tickets_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.tickets(principal))
}

pub(crate) async fn ticket_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.ticket(principal, &TicketCode(code)))
}

pub(crate) async fn reply_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
    Json(body): Json<ReplyBody>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.reply_to_ticket(principal, &TicketCode(code), &body.message),
    )
}

pub(crate) async fn close_ticket_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(code): Path<String>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.close_ticket(principal, &TicketCode(code)),
    )
}

pub(crate) async fn notifications_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(StatusCode::OK, service.notifications(principal))
}

pub(crate) async fn read_all_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    let outcome = service
        .mark_all_notifications_read(principal)
        .map(|marked| json!({ "marked_read": marked }));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn read_one_handler<S, F>(
    State(service): Service<S, F>,
    principal: Principal,
    Path(id): Path<u64>,
) -> Response
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    respond(
        StatusCode::OK,
        service.mark_notification_read(principal, NotificationId(id)),
    )
}
