use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::admissions::domain::{
    Application, ApplicationSubmission, NewStudent, Notification, Principal, ReviewDecision,
    StorageLocator, StudyLevel, User, UserId,
};
use crate::workflows::admissions::files::{
    FileRemoval, FileStore, FileStoreError, InMemoryFileStore,
};
use crate::workflows::admissions::notifications::{DeliveryError, NotificationChannel};
use crate::workflows::admissions::repository::{PortalStore, PortalTransaction, RepositoryError};
use crate::workflows::admissions::{
    AdmissionsService, FixedClock, InMemoryPortalStore, PortalPolicy,
};

pub(super) fn september_first() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap()
}

pub(super) struct Harness<S: PortalStore + 'static = InMemoryPortalStore> {
    pub(super) service: Arc<AdmissionsService<S, InMemoryFileStore>>,
    pub(super) store: Arc<S>,
    pub(super) files: Arc<InMemoryFileStore>,
    pub(super) clock: Arc<FixedClock>,
    pub(super) channel: Arc<RecordingChannel>,
    pub(super) admin: User,
}

impl<S: PortalStore + 'static> Harness<S> {
    pub(super) fn admin(&self) -> Principal {
        self.admin.principal()
    }

    /// Registers a student whose nationality decides local or international handling.
    pub(super) fn student(&self, email: &str, nationality: &str) -> User {
        self.service
            .register_student(NewStudent {
                email: email.to_string(),
                full_name: format!("Student {email}"),
                phone: None,
                nationality: nationality.to_string(),
            })
            .expect("student registers")
    }

    pub(super) fn submit(&self, student: &User, program: &str) -> Application {
        self.service
            .submit_application(student.principal(), submission(program))
            .expect("application submitted")
    }

    /// Submitted, approved and paid: ready for student-ID generation.
    pub(super) fn ready_for_enrollment(&self, student: &User, program: &str) -> Application {
        let application = self.submit(student, program);
        self.service
            .review_application(self.admin(), &application.code, ReviewDecision::Approve)
            .expect("review succeeds");
        self.service
            .record_application_payment(student.principal(), &application.code, "card")
            .expect("payment succeeds")
            .record
    }
}

pub(super) fn harness() -> Harness {
    harness_with_store(Arc::new(InMemoryPortalStore::new()))
}

pub(super) fn harness_with_store<S: PortalStore + 'static>(store: Arc<S>) -> Harness<S> {
    harness_with(store, PortalPolicy::default())
}

pub(super) fn harness_with<S: PortalStore + 'static>(
    store: Arc<S>,
    policy: PortalPolicy,
) -> Harness<S> {
    let files = Arc::new(InMemoryFileStore::default());
    let clock = Arc::new(FixedClock::at(september_first()));
    let channel = Arc::new(RecordingChannel::default());
    let service = AdmissionsService::new(store.clone(), files.clone(), policy)
        .with_clock(clock.clone())
        .with_channel(channel.clone());
    let admin = service
        .ensure_admin("admin@example.com", "Registrar")
        .expect("admin seeded");

    Harness {
        service: Arc::new(service),
        store,
        files,
        clock,
        channel,
        admin,
    }
}

pub(super) fn submission(program: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        program: program.to_string(),
        level: StudyLevel::Masters,
    }
}

pub(super) fn stranger() -> Principal {
    Principal::student(UserId(999))
}

/// Channel that remembers every delivered notification.
#[derive(Default)]
pub(super) struct RecordingChannel {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingChannel {
    pub(super) fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().expect("channel mutex poisoned").clone()
    }

    pub(super) fn delivered_to(&self, recipient: UserId) -> Vec<String> {
        self.delivered()
            .into_iter()
            .filter(|notification| notification.recipient == recipient)
            .map(|notification| notification.message)
            .collect()
    }
}

impl NotificationChannel for RecordingChannel {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .expect("channel mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

pub(super) struct FailingChannel;

impl NotificationChannel for FailingChannel {
    fn deliver(&self, _notification: &Notification) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport("smtp offline".to_string()))
    }
}

/// Runs the work, then refuses to commit while `fail_commits` is set.
#[derive(Default)]
pub(super) struct FlakyCommitStore {
    pub(super) inner: InMemoryPortalStore,
    pub(super) fail_commits: AtomicBool,
}

impl FlakyCommitStore {
    pub(super) fn fail_next_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl PortalStore for FlakyCommitStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PortalTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.transaction(|tx| {
            let value = work(tx)?;
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(E::from(RepositoryError::Unavailable(
                    "commit rejected".to_string(),
                )));
            }
            Ok(value)
        })
    }

    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn PortalTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.read(work)
    }
}

/// File store whose disk is gone: every call fails.
#[derive(Default)]
pub(super) struct BrokenFileStore;

impl FileStore for BrokenFileStore {
    fn store(&self, _bytes: &[u8], _declared_name: &str) -> Result<StorageLocator, FileStoreError> {
        Err(read_only_volume())
    }

    fn delete(&self, _locator: &StorageLocator) -> Result<FileRemoval, FileStoreError> {
        Err(read_only_volume())
    }
}

fn read_only_volume() -> FileStoreError {
    FileStoreError::Io(io::Error::new(
        io::ErrorKind::PermissionDenied,
        "read-only volume",
    ))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
