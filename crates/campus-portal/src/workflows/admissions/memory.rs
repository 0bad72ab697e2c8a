use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::domain::{
    Application, ApplicationCode, Certificate, CertificateCode, Document, DocumentId,
    FundedEntity, Notification, NotificationId, Payment, Role, StudentIdCode, StudentIdRecord,
    StudentIdScope, Ticket, TicketCode, User, UserId,
};
use super::repository::{
    ApplicationFilter, PortalStore, PortalTransaction, RepositoryError, SequenceKind,
};

/// Process-local storage engine.
///
/// Transactions are serialized behind one mutex and run against a private copy of the
/// tables, which replaces the committed copy only on success. When a snapshot path is
/// configured the copy is written to disk before it is published, so a failed write
/// rolls the transaction back. Reads borrow the committed tables directly.
#[derive(Debug, Default)]
pub struct InMemoryPortalStore {
    tables: Mutex<PortalTables>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryPortalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted as JSON at `path`, starting empty when the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let tables = if path.exists() {
            let raw = fs::read(&path).map_err(|err| unavailable(&path, err))?;
            serde_json::from_slice(&raw).map_err(|err| unavailable(&path, err))?
        } else {
            PortalTables::default()
        };

        Ok(Self {
            tables: Mutex::new(tables),
            snapshot_path: Some(path),
        })
    }
}

impl PortalStore for InMemoryPortalStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PortalTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        // The committed tables are only replaced after `work` succeeds, so a poisoned
        // lock still guards consistent data.
        let mut committed = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let mut working = committed.clone();
        let value = work(&mut working)?;

        if !working.dirty {
            return Ok(value);
        }
        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &working)?;
        }

        working.dirty = false;
        *committed = working;
        Ok(value)
    }

    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn PortalTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let committed = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        work(&*committed)
    }
}

fn write_snapshot(path: &Path, tables: &PortalTables) -> Result<(), RepositoryError> {
    let payload = serde_json::to_vec_pretty(tables).map_err(|err| unavailable(path, err))?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, payload).map_err(|err| unavailable(&staging, err))?;
    fs::rename(&staging, path).map_err(|err| unavailable(path, err))
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Unavailable(format!("snapshot {}: {err}", path.display()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PortalTables {
    sequences: BTreeMap<SequenceKind, u64>,
    users: BTreeMap<UserId, User>,
    applications: BTreeMap<ApplicationCode, Application>,
    student_ids: BTreeMap<StudentIdCode, StudentIdRecord>,
    documents: BTreeMap<DocumentId, Document>,
    certificates: BTreeMap<CertificateCode, Certificate>,
    tickets: BTreeMap<TicketCode, Ticket>,
    notifications: BTreeMap<NotificationId, Notification>,
    payments: Vec<Payment>,
    #[serde(skip)]
    dirty: bool,
}

impl PortalTables {
    fn stored(&self, kind: SequenceKind) -> usize {
        match kind {
            SequenceKind::User => self.users.len(),
            SequenceKind::Application => self.applications.len(),
            SequenceKind::Ticket => self.tickets.len(),
            SequenceKind::Document => self.documents.len(),
            SequenceKind::Notification => self.notifications.len(),
            SequenceKind::Payment => self.payments.len(),
        }
    }
}

fn newest_first<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

fn replace<K: Ord, V>(table: &mut BTreeMap<K, V>, key: K, value: V) -> Result<(), RepositoryError> {
    match table.get_mut(&key) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(RepositoryError::NotFound),
    }
}

fn insert_new<K: Ord, V>(
    table: &mut BTreeMap<K, V>,
    key: K,
    value: V,
) -> Result<(), RepositoryError> {
    if table.contains_key(&key) {
        return Err(RepositoryError::Conflict);
    }
    table.insert(key, value);
    Ok(())
}

impl PortalTransaction for PortalTables {
    fn next_sequence(&mut self, kind: SequenceKind) -> Result<u64, RepositoryError> {
        self.dirty = true;
        let floor = self.stored(kind) as u64;
        let counter = self.sequences.entry(kind).or_insert(0);
        *counter = (*counter).max(floor) + 1;
        Ok(*counter)
    }

    fn insert_user(&mut self, user: User) -> Result<(), RepositoryError> {
        self.dirty = true;
        if self.user_by_email(&user.email)?.is_some() {
            return Err(RepositoryError::Conflict);
        }
        insert_new(&mut self.users, user.id, user)
    }

    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).cloned())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let email = email.trim();
        Ok(self
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn users_with_role(&self, role: Role) -> Result<Vec<User>, RepositoryError> {
        Ok(self
            .users
            .values()
            .filter(|user| user.role == role)
            .cloned()
            .collect())
    }

    fn update_user(&mut self, user: User) -> Result<(), RepositoryError> {
        self.dirty = true;
        replace(&mut self.users, user.id, user)
    }

    fn insert_application(&mut self, application: Application) -> Result<(), RepositoryError> {
        self.dirty = true;
        insert_new(
            &mut self.applications,
            application.code.clone(),
            application,
        )
    }

    fn application(&self, code: &ApplicationCode) -> Result<Option<Application>, RepositoryError> {
        Ok(self.applications.get(code).cloned())
    }

    fn update_application(&mut self, application: Application) -> Result<(), RepositoryError> {
        self.dirty = true;
        replace(
            &mut self.applications,
            application.code.clone(),
            application,
        )
    }

    fn applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, RepositoryError> {
        let rows = self
            .applications
            .values()
            .filter(|application| filter.matches(application))
            .cloned()
            .collect();
        Ok(newest_first(rows, |row: &Application| {
            (row.submitted_at, row.code.clone())
        }))
    }

    fn insert_student_id(&mut self, record: StudentIdRecord) -> Result<(), RepositoryError> {
        self.dirty = true;
        if self.student_id_for(&record.application)?.is_some() {
            return Err(RepositoryError::Conflict);
        }
        insert_new(&mut self.student_ids, record.code.clone(), record)
    }

    fn student_id_for(
        &self,
        application: &ApplicationCode,
    ) -> Result<Option<StudentIdRecord>, RepositoryError> {
        Ok(self
            .student_ids
            .values()
            .find(|record| &record.application == application)
            .cloned())
    }

    fn max_student_sequence(
        &self,
        scope: &StudentIdScope,
    ) -> Result<Option<u16>, RepositoryError> {
        Ok(self
            .student_ids
            .values()
            .filter(|record| &record.scope == scope)
            .map(|record| record.sequence)
            .max())
    }

    fn student_ids(&self) -> Result<Vec<StudentIdRecord>, RepositoryError> {
        let rows = self.student_ids.values().cloned().collect();
        Ok(newest_first(rows, |row: &StudentIdRecord| {
            (row.issued_at, row.code.clone())
        }))
    }

    fn insert_document(&mut self, document: Document) -> Result<(), RepositoryError> {
        self.dirty = true;
        insert_new(&mut self.documents, document.id, document)
    }

    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        Ok(self.documents.get(&id).cloned())
    }

    fn remove_document(&mut self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        self.dirty = true;
        Ok(self.documents.remove(&id))
    }

    fn documents_for(&self, owner: UserId) -> Result<Vec<Document>, RepositoryError> {
        let rows = self
            .documents
            .values()
            .filter(|document| document.owner == owner)
            .cloned()
            .collect();
        Ok(newest_first(rows, |row: &Document| (row.uploaded_at, row.id)))
    }

    fn insert_certificate(&mut self, certificate: Certificate) -> Result<(), RepositoryError> {
        self.dirty = true;
        insert_new(
            &mut self.certificates,
            certificate.code.clone(),
            certificate,
        )
    }

    fn certificate(&self, code: &CertificateCode) -> Result<Option<Certificate>, RepositoryError> {
        Ok(self.certificates.get(code).cloned())
    }

    fn latest_certificate_code(&self) -> Result<Option<CertificateCode>, RepositoryError> {
        Ok(self.certificates.keys().next_back().cloned())
    }

    fn update_certificate(&mut self, certificate: Certificate) -> Result<(), RepositoryError> {
        self.dirty = true;
        replace(
            &mut self.certificates,
            certificate.code.clone(),
            certificate,
        )
    }

    fn certificates(&self, owner: Option<UserId>) -> Result<Vec<Certificate>, RepositoryError> {
        let rows = self
            .certificates
            .values()
            .filter(|certificate| owner.map_or(true, |owner| certificate.owner == owner))
            .cloned()
            .collect();
        Ok(newest_first(rows, |row: &Certificate| {
            (row.requested_at, row.code.clone())
        }))
    }

    fn insert_ticket(&mut self, ticket: Ticket) -> Result<(), RepositoryError> {
        self.dirty = true;
        insert_new(&mut self.tickets, ticket.code.clone(), ticket)
    }

    fn ticket(&self, code: &TicketCode) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self.tickets.get(code).cloned())
    }

    fn update_ticket(&mut self, ticket: Ticket) -> Result<(), RepositoryError> {
        self.dirty = true;
        replace(&mut self.tickets, ticket.code.clone(), ticket)
    }

    fn tickets(&self, owner: Option<UserId>) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = self
            .tickets
            .values()
            .filter(|ticket| owner.map_or(true, |owner| ticket.owner == owner))
            .cloned()
            .collect();
        Ok(newest_first(rows, |row: &Ticket| {
            (row.created_at, row.code.clone())
        }))
    }

    fn insert_notification(&mut self, notification: Notification) -> Result<(), RepositoryError> {
        self.dirty = true;
        insert_new(&mut self.notifications, notification.id, notification)
    }

    fn notification(&self, id: NotificationId) -> Result<Option<Notification>, RepositoryError> {
        Ok(self.notifications.get(&id).cloned())
    }

    fn update_notification(&mut self, notification: Notification) -> Result<(), RepositoryError> {
        self.dirty = true;
        replace(&mut self.notifications, notification.id, notification)
    }

    fn notifications_for(&self, recipient: UserId) -> Result<Vec<Notification>, RepositoryError> {
        let rows = self
            .notifications
            .values()
            .filter(|notification| notification.recipient == recipient)
            .cloned()
            .collect();
        Ok(newest_first(rows, |row: &Notification| {
            (row.created_at, row.id)
        }))
    }

    fn insert_payment(&mut self, payment: Payment) -> Result<(), RepositoryError> {
        self.dirty = true;
        if self.payments.iter().any(|existing| {
            existing.id == payment.id || existing.transaction_code == payment.transaction_code
        }) {
            return Err(RepositoryError::Conflict);
        }
        self.payments.push(payment);
        Ok(())
    }

    fn payments_for(&self, funds: &FundedEntity) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self
            .payments
            .iter()
            .filter(|payment| &payment.funds == funds)
            .cloned()
            .collect())
    }
}
