//! Admissions and enrollment workflow engine.
//!
//! Applications, certificates and support tickets move through closed state machines.
//! Each operation runs as one storage transaction: the precondition check, identifier
//! allocation, state change, payment record and notifications commit together or not at all.

mod certificates;
pub mod clock;
mod documents;
pub mod domain;
pub mod files;
pub mod identifiers;
pub mod ledger;
pub mod memory;
pub mod notifications;
pub mod repository;
pub mod router;
pub mod service;
mod support;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    Application, ApplicationCode, ApplicationStatus, ApplicationSubmission, Certificate,
    CertificateCode, CertificateRequest, CertificateStatus, Document, DocumentId, DocumentUpload,
    FundedEntity, NationalityClass, NewStudent, NewTicket, Notification, NotificationId, Payment,
    PaymentStatus, Principal, ProfileUpdate, ReviewDecision, Role, StudentIdCode, StudentIdRecord,
    StudyLevel, Ticket, TicketCode, TicketStatus, User, UserId,
};
pub use files::{DiskFileStore, FileRemoval, FileStore, FileStoreError, InMemoryFileStore};
pub use identifiers::{IdentifierGenerator, IdentifierKind};
pub use ledger::{FeeSchedule, PaymentReceipt};
pub use memory::InMemoryPortalStore;
pub use notifications::{DeliveryError, NotificationChannel, NotificationFeed, TracingChannel};
pub use repository::{PortalStore, PortalTransaction, RepositoryError};
pub use router::portal_router;
pub use service::{
    AdminDashboard, AdmissionsService, EnrolledStudent, PortalPolicy, StudentOverview,
    WorkflowError,
};
