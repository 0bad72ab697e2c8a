use serde::{Deserialize, Serialize};

use super::domain::{
    Application, ApplicationCode, ApplicationStatus, Certificate, CertificateCode, Document,
    DocumentId, FundedEntity, Notification, NotificationId, Payment, PaymentStatus, Role,
    StudentIdRecord, StudentIdScope, Ticket, TicketCode, User, UserId,
};

/// Counters backing generated identifiers. Each counter never falls below the number of
/// stored records of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    User,
    Application,
    Ticket,
    Document,
    Notification,
    Payment,
}

/// Optional filters for application listings; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    pub owner: Option<UserId>,
    pub status: Option<ApplicationStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl ApplicationFilter {
    pub fn owned_by(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status);
        self
    }

    pub fn matches(&self, application: &Application) -> bool {
        self.owner.map_or(true, |owner| application.owner == owner)
            && self.status.map_or(true, |status| application.status == status)
            && self
                .payment_status
                .map_or(true, |payment| application.payment_status == payment)
    }
}

/// Storage engine entry point. Every workflow operation runs inside one call to
/// [`PortalStore::transaction`]; the writes made by `work` become visible only when it
/// returns `Ok`, and concurrent transactions observe each other serially.
pub trait PortalStore: Send + Sync {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PortalTransaction) -> Result<T, E>,
        E: From<RepositoryError>;

    /// Runs read-only `work` against the committed state.
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn PortalTransaction) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Reads and writes available inside a storage transaction.
///
/// Inserts enforce uniqueness of primary keys and generated codes with
/// [`RepositoryError::Conflict`]; updates of missing rows fail with
/// [`RepositoryError::NotFound`]. Listings are ordered newest first.
pub trait PortalTransaction {
    fn next_sequence(&mut self, kind: SequenceKind) -> Result<u64, RepositoryError>;

    fn insert_user(&mut self, user: User) -> Result<(), RepositoryError>;
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    fn users_with_role(&self, role: Role) -> Result<Vec<User>, RepositoryError>;
    fn update_user(&mut self, user: User) -> Result<(), RepositoryError>;

    fn insert_application(&mut self, application: Application) -> Result<(), RepositoryError>;
    fn application(&self, code: &ApplicationCode) -> Result<Option<Application>, RepositoryError>;
    fn update_application(&mut self, application: Application) -> Result<(), RepositoryError>;
    fn applications(&self, filter: &ApplicationFilter)
        -> Result<Vec<Application>, RepositoryError>;

    /// Conflicts when the code is taken or the application already has a student ID.
    fn insert_student_id(&mut self, record: StudentIdRecord) -> Result<(), RepositoryError>;
    fn student_id_for(
        &self,
        application: &ApplicationCode,
    ) -> Result<Option<StudentIdRecord>, RepositoryError>;
    fn max_student_sequence(&self, scope: &StudentIdScope)
        -> Result<Option<u16>, RepositoryError>;
    fn student_ids(&self) -> Result<Vec<StudentIdRecord>, RepositoryError>;

    fn insert_document(&mut self, document: Document) -> Result<(), RepositoryError>;
    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError>;
    fn remove_document(&mut self, id: DocumentId) -> Result<Option<Document>, RepositoryError>;
    fn documents_for(&self, owner: UserId) -> Result<Vec<Document>, RepositoryError>;

    fn insert_certificate(&mut self, certificate: Certificate) -> Result<(), RepositoryError>;
    fn certificate(&self, code: &CertificateCode) -> Result<Option<Certificate>, RepositoryError>;
    /// Highest certificate code in sort order.
    fn latest_certificate_code(&self) -> Result<Option<CertificateCode>, RepositoryError>;
    fn update_certificate(&mut self, certificate: Certificate) -> Result<(), RepositoryError>;
    fn certificates(&self, owner: Option<UserId>) -> Result<Vec<Certificate>, RepositoryError>;

    fn insert_ticket(&mut self, ticket: Ticket) -> Result<(), RepositoryError>;
    fn ticket(&self, code: &TicketCode) -> Result<Option<Ticket>, RepositoryError>;
    fn update_ticket(&mut self, ticket: Ticket) -> Result<(), RepositoryError>;
    fn tickets(&self, owner: Option<UserId>) -> Result<Vec<Ticket>, RepositoryError>;

    fn insert_notification(&mut self, notification: Notification) -> Result<(), RepositoryError>;
    fn notification(&self, id: NotificationId) -> Result<Option<Notification>, RepositoryError>;
    fn update_notification(&mut self, notification: Notification)
        -> Result<(), RepositoryError>;
    fn notifications_for(&self, recipient: UserId) -> Result<Vec<Notification>, RepositoryError>;

    /// Payments are append-only; there is no update or delete.
    fn insert_payment(&mut self, payment: Payment) -> Result<(), RepositoryError>;
    fn payments_for(&self, funds: &FundedEntity) -> Result<Vec<Payment>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
