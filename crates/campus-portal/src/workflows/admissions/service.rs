use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::domain::{
    Application, ApplicationCode, ApplicationStatus, ApplicationSubmission, Certificate,
    CertificateStatus, NationalityClass, NewStudent, PaymentStatus, Principal, ProfileUpdate,
    ReviewDecision, Role, StudentIdRecord, Ticket, TicketStatus, User, UserId,
};
use super::files::{FileStore, FileStoreError};
use super::identifiers::{
    program_code, IdentifierGenerator, IdentifierKind, DEFAULT_MAX_ATTEMPTS,
};
use super::ledger::FeeSchedule;
use super::notifications::{NotificationChannel, Outbox, TracingChannel};
use super::repository::{
    ApplicationFilter, PortalStore, PortalTransaction, RepositoryError, SequenceKind,
};

const RECENT_LIMIT: usize = 3;

/// Policy dials for the admissions workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalPolicy {
    pub fees: FeeSchedule,
    /// Nationality treated as local for fees and student-ID prefixes.
    pub home_nationality: String,
    pub allowed_extensions: Vec<String>,
    pub max_identifier_attempts: u32,
}

impl Default for PortalPolicy {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            home_nationality: "Egyptian".to_string(),
            allowed_extensions: ["png", "jpg", "jpeg", "gif", "pdf", "doc", "docx"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_identifier_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Workflow engine facade: every public operation is one storage transaction whose state
/// changes, payments and notifications commit together.
pub struct AdmissionsService<S, F> {
    pub(crate) store: Arc<S>,
    pub(crate) files: Arc<F>,
    pub(crate) policy: PortalPolicy,
    pub(crate) identifiers: IdentifierGenerator,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) channel: Arc<dyn NotificationChannel>,
}

impl<S, F> AdmissionsService<S, F>
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    pub fn new(store: Arc<S>, files: Arc<F>, policy: PortalPolicy) -> Self {
        let identifiers = IdentifierGenerator::new(policy.max_identifier_attempts);
        Self {
            store,
            files,
            policy,
            identifiers,
            clock: Arc::new(SystemClock),
            channel: Arc::new(TracingChannel),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = channel;
        self
    }

    pub fn policy(&self) -> &PortalPolicy {
        &self.policy
    }

    /// Runs `work` in one transaction and hands its notifications to the channel once the
    /// transaction has committed.
    pub(crate) fn execute<T>(
        &self,
        work: impl FnOnce(
            &mut dyn PortalTransaction,
            &mut Outbox,
            DateTime<Utc>,
        ) -> Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        let now = self.clock.now();
        let (value, outbox) = self.store.transaction(|tx| {
            let mut outbox = Outbox::default();
            let value = work(tx, &mut outbox, now)?;
            Ok::<_, WorkflowError>((value, outbox))
        })?;
        outbox.deliver(self.channel.as_ref());
        Ok(value)
    }

    /// Registers a student account; the nationality class is fixed at registration.
    pub fn register_student(&self, student: NewStudent) -> Result<User, WorkflowError> {
        let email = required(&student.email, "email")?;
        let full_name = required(&student.full_name, "full name")?;
        let nationality = required(&student.nationality, "nationality")?;
        let nationality_class =
            NationalityClass::classify(&nationality, &self.policy.home_nationality);

        self.execute(|tx, _, now| {
            if tx.user_by_email(&email)?.is_some() {
                return Err(WorkflowError::InvalidInput(format!(
                    "email {email} is already registered"
                )));
            }

            let user = User {
                id: UserId(tx.next_sequence(SequenceKind::User)?),
                email,
                full_name,
                phone: student.phone.filter(|phone| !phone.trim().is_empty()),
                nationality,
                nationality_class,
                role: Role::Student,
                created_at: now,
            };
            tx.insert_user(user.clone())?;
            info!(user = %user.id, class = nationality_class.label(), "student registered");
            Ok(user)
        })
    }

    /// Creates the admin account for `email` unless one exists; returns the stored account.
    pub fn ensure_admin(&self, email: &str, full_name: &str) -> Result<User, WorkflowError> {
        let email = required(email, "email")?;
        let full_name = required(full_name, "full name")?;
        let home_nationality = self.policy.home_nationality.clone();

        self.execute(|tx, _, now| {
            if let Some(existing) = tx.user_by_email(&email)? {
                if existing.role != Role::Admin {
                    return Err(WorkflowError::InvalidInput(format!(
                        "{email} belongs to a student account"
                    )));
                }
                return Ok(existing);
            }

            let admin = User {
                id: UserId(tx.next_sequence(SequenceKind::User)?),
                email,
                full_name,
                phone: None,
                nationality: home_nationality,
                nationality_class: NationalityClass::Local,
                role: Role::Admin,
                created_at: now,
            };
            tx.insert_user(admin.clone())?;
            info!(user = %admin.id, "admin account created");
            Ok(admin)
        })
    }

    pub fn user(&self, principal: Principal, id: UserId) -> Result<User, WorkflowError> {
        if !principal.is_admin() && !principal.owns(id) {
            return Err(WorkflowError::Unauthorized {
                action: "view another user's profile",
            });
        }
        self.store.read(|tx| load_user(tx, id))
    }

    /// Replaces the caller's name and phone; email and nationality stay as registered.
    pub fn update_profile(
        &self,
        principal: Principal,
        update: ProfileUpdate,
    ) -> Result<User, WorkflowError> {
        require_role(principal, Role::Student, "update a profile")?;
        let full_name = required(&update.full_name, "full name")?;
        let phone = update
            .phone
            .map(|phone| phone.trim().to_string())
            .filter(|phone| !phone.is_empty());

        self.execute(|tx, _, _| {
            let mut user = load_user(tx, principal.user_id)?;
            user.full_name = full_name;
            user.phone = phone;
            tx.update_user(user.clone())?;
            info!(user = %user.id, "profile updated");
            Ok(user)
        })
    }

    /// Submits an application (status PendingReview, payment Pending) and notifies staff.
    pub fn submit_application(
        &self,
        principal: Principal,
        submission: ApplicationSubmission,
    ) -> Result<Application, WorkflowError> {
        require_role(principal, Role::Student, "submit an application")?;
        let program = required(&submission.program, "program")?;
        if program_code(&program).is_empty() {
            return Err(WorkflowError::InvalidInput("program has no name".to_string()));
        }

        self.execute(|tx, outbox, now| {
            let applicant = load_user(tx, principal.user_id)?;
            let application = self.identifiers.issue_application(tx, |code| Application {
                code,
                owner: applicant.id,
                program: program.clone(),
                level: submission.level,
                status: ApplicationStatus::PendingReview,
                payment_status: PaymentStatus::Pending,
                submitted_at: now,
            })?;

            outbox.emit_to_admins(
                tx,
                &format!("New application received from {}", applicant.full_name),
                now,
            )?;

            info!(application = %application.code, owner = %applicant.id, "application submitted");
            Ok(application)
        })
    }

    /// Staff decision on a PendingReview application.
    pub fn review_application(
        &self,
        principal: Principal,
        code: &ApplicationCode,
        decision: ReviewDecision,
    ) -> Result<Application, WorkflowError> {
        require_role(principal, Role::Admin, "review applications")?;

        self.execute(|tx, outbox, now| {
            let mut application = load_application(tx, code)?;
            if application.status != ApplicationStatus::PendingReview {
                return Err(WorkflowError::InvalidTransition {
                    entity: "application",
                    id: code.to_string(),
                    state: application.status.label(),
                    action: "be reviewed",
                });
            }

            application.status = decision.target_status();
            tx.update_application(application.clone())?;

            let message = match decision {
                ReviewDecision::Approve => format!(
                    "Documents for application {code} were approved. Please complete the application fee payment."
                ),
                ReviewDecision::Reject => {
                    format!("Documents for application {code} were rejected.")
                }
            };
            outbox.emit(tx, application.owner, message, now)?;

            info!(application = %code, status = application.status.label(), "application reviewed");
            Ok(application)
        })
    }

    /// Issues the student ID and enrolls an approved, paid application.
    pub fn generate_student_id(
        &self,
        principal: Principal,
        code: &ApplicationCode,
    ) -> Result<StudentIdRecord, WorkflowError> {
        require_role(principal, Role::Admin, "generate student ids")?;

        self.execute(|tx, outbox, now| {
            let mut application = load_application(tx, code)?;
            if !application.ready_for_enrollment() || tx.student_id_for(code)?.is_some() {
                let state = match (application.status, application.payment_status) {
                    (ApplicationStatus::DocumentsApproved, PaymentStatus::Pending) => {
                        "awaiting payment"
                    }
                    (status, _) => status.label(),
                };
                return Err(WorkflowError::InvalidTransition {
                    entity: "application",
                    id: code.to_string(),
                    state,
                    action: "enroll",
                });
            }

            let student = load_user(tx, application.owner)?;
            let record = self.identifiers.issue_student_id(
                tx,
                &application,
                student.nationality_class,
                now,
            )?;

            application.status = ApplicationStatus::Enrolled;
            tx.update_application(application.clone())?;
            outbox.emit(
                tx,
                application.owner,
                format!("Your student ID has been issued: {}", record.code),
                now,
            )?;

            info!(application = %code, student_id = %record.code, "student enrolled");
            Ok(record)
        })
    }

    pub fn application(
        &self,
        principal: Principal,
        code: &ApplicationCode,
    ) -> Result<Application, WorkflowError> {
        self.store.read(|tx| {
            let application = load_application(tx, code)?;
            ensure_visible(principal, application.owner, "view this application")?;
            Ok(application)
        })
    }

    /// Own applications for students, every application for staff.
    pub fn applications(&self, principal: Principal) -> Result<Vec<Application>, WorkflowError> {
        let filter = if principal.is_admin() {
            ApplicationFilter::default()
        } else {
            ApplicationFilter::owned_by(principal.user_id)
        };
        self.store.read(|tx| Ok(tx.applications(&filter)?))
    }

    /// Approved and paid applications still waiting for a student ID.
    pub fn pending_enrollments(
        &self,
        principal: Principal,
    ) -> Result<Vec<Application>, WorkflowError> {
        require_role(principal, Role::Admin, "view the enrollment queue")?;
        let filter = ApplicationFilter::default()
            .with_status(ApplicationStatus::DocumentsApproved)
            .with_payment_status(PaymentStatus::Paid);

        self.store.read(|tx| {
            let mut queue = Vec::new();
            for application in tx.applications(&filter)? {
                if tx.student_id_for(&application.code)?.is_none() {
                    queue.push(application);
                }
            }
            Ok(queue)
        })
    }

    pub fn enrolled_students(
        &self,
        principal: Principal,
    ) -> Result<Vec<EnrolledStudent>, WorkflowError> {
        require_role(principal, Role::Admin, "view enrolled students")?;
        self.store.read(|tx| {
            let mut enrolled = Vec::new();
            for student_id in tx.student_ids()? {
                let application = load_application(tx, &student_id.application)?;
                enrolled.push(EnrolledStudent {
                    application,
                    student_id,
                });
            }
            Ok(enrolled)
        })
    }

    pub fn admin_dashboard(&self, principal: Principal) -> Result<AdminDashboard, WorkflowError> {
        require_role(principal, Role::Admin, "view the staff dashboard")?;
        self.store.read(|tx| {
            let applications = tx.applications(&ApplicationFilter::default())?;
            let certificates = tx.certificates(None)?;
            let tickets = tx.tickets(None)?;

            Ok(AdminDashboard {
                pending_review: applications
                    .iter()
                    .filter(|app| app.status == ApplicationStatus::PendingReview)
                    .count(),
                awaiting_payment: applications
                    .iter()
                    .filter(|app| {
                        app.status == ApplicationStatus::DocumentsApproved
                            && app.payment_status == PaymentStatus::Pending
                    })
                    .count(),
                certificate_requests: certificates.len(),
                open_tickets: tickets
                    .iter()
                    .filter(|ticket| ticket.status == TicketStatus::Open)
                    .count(),
                recent_applications: applications.into_iter().take(RECENT_LIMIT).collect(),
                recent_tickets: tickets.into_iter().take(RECENT_LIMIT).collect(),
                recent_certificates: certificates.into_iter().take(RECENT_LIMIT).collect(),
            })
        })
    }

    pub fn student_overview(
        &self,
        principal: Principal,
    ) -> Result<StudentOverview, WorkflowError> {
        require_role(principal, Role::Student, "view the student overview")?;
        self.store.read(|tx| {
            let applications = tx.applications(&ApplicationFilter::owned_by(principal.user_id))?;
            let certificates = tx.certificates(Some(principal.user_id))?;
            let unread_notifications = tx
                .notifications_for(principal.user_id)?
                .iter()
                .filter(|notification| !notification.read)
                .count();

            Ok(StudentOverview {
                payment_required: applications.iter().any(|app| {
                    app.status == ApplicationStatus::DocumentsApproved
                        && app.payment_status == PaymentStatus::Pending
                }),
                certificate_ready: certificates
                    .iter()
                    .any(|cert| cert.status == CertificateStatus::ReadyForPickup),
                unread_notifications,
                applications,
            })
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrolledStudent {
    pub application: Application,
    pub student_id: StudentIdRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub pending_review: usize,
    pub awaiting_payment: usize,
    pub certificate_requests: usize,
    pub open_tickets: usize,
    pub recent_applications: Vec<Application>,
    pub recent_tickets: Vec<Ticket>,
    pub recent_certificates: Vec<Certificate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentOverview {
    pub applications: Vec<Application>,
    pub payment_required: bool,
    pub certificate_ready: bool,
    pub unread_notifications: usize,
}

pub(crate) fn require_role(
    principal: Principal,
    role: Role,
    action: &'static str,
) -> Result<(), WorkflowError> {
    if principal.role == role {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized { action })
    }
}

/// Owners and staff may read a record.
pub(crate) fn ensure_visible(
    principal: Principal,
    owner: UserId,
    action: &'static str,
) -> Result<(), WorkflowError> {
    if principal.is_admin() || principal.owns(owner) {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized { action })
    }
}

pub(crate) fn required(value: &str, field: &str) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(WorkflowError::InvalidInput(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}

pub(crate) fn load_user(tx: &dyn PortalTransaction, id: UserId) -> Result<User, WorkflowError> {
    tx.user(id)?.ok_or_else(|| WorkflowError::NotFound {
        entity: "user",
        id: id.to_string(),
    })
}

pub(crate) fn load_application(
    tx: &dyn PortalTransaction,
    code: &ApplicationCode,
) -> Result<Application, WorkflowError> {
    tx.application(code)?.ok_or_else(|| WorkflowError::NotFound {
        entity: "application",
        id: code.to_string(),
    })
}

/// Error raised by the admissions workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} cannot {action} while {state}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        state: &'static str,
        action: &'static str,
    },
    #[error("not authorized to {action}")]
    Unauthorized { action: &'static str },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("identifier {0} is already taken")]
    DuplicateIdentifier(String),
    #[error("could not allocate a unique {kind} identifier after {attempts} attempt(s)")]
    GenerationFailed { kind: IdentifierKind, attempts: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
    #[error(transparent)]
    FileStore(#[from] FileStoreError),
}
