//! Human-readable identifiers for portal records.
//!
//! Every allocation runs inside the caller's storage transaction, so the "read current
//! sequence, format, insert" steps form one serializable unit. The storage layer also
//! rejects duplicate codes; a rejected insert is retried with a fresh value until the
//! attempt budget runs out.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{
    Application, ApplicationCode, Certificate, CertificateCode, NationalityClass,
    StudentIdCode, StudentIdRecord, StudentIdScope, Ticket, TicketCode,
};
use super::repository::{PortalTransaction, RepositoryError, SequenceKind};
use super::service::WorkflowError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const MAX_STUDENT_SEQUENCE: u16 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Application,
    Ticket,
    Certificate,
    StudentId,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IdentifierKind::Application => "application",
            IdentifierKind::Ticket => "ticket",
            IdentifierKind::Certificate => "certificate",
            IdentifierKind::StudentId => "student id",
        };
        f.write_str(label)
    }
}

pub fn application_code(sequence: u64) -> ApplicationCode {
    ApplicationCode(format!("APP-{sequence:03}"))
}

pub fn ticket_code(sequence: u64) -> TicketCode {
    TicketCode(format!("TKT-{sequence:03}"))
}

pub fn certificate_code(at: DateTime<Utc>) -> CertificateCode {
    CertificateCode(format!("CERT-{}", at.format("%Y%m%d%H%M%S")))
}

/// Payment reference: generation second plus the payment sequence.
pub fn transaction_code(at: DateTime<Utc>, sequence: u64) -> String {
    format!("TXN-{}-{sequence:04}", at.format("%Y%m%d%H%M%S"))
}

/// Uppercased initial of every word, e.g. "Master of Business Administration" -> "MOBA".
pub fn program_code(program: &str) -> String {
    program
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn student_id_scope(
    year: i32,
    nationality_class: NationalityClass,
    program: &str,
) -> StudentIdScope {
    StudentIdScope {
        year,
        nationality_class,
        program_code: program_code(program),
    }
}

/// `YYYY-LOC-PROG-NNNN` / `YYYY-INT-PROG-NNNN`.
pub fn student_id_code(scope: &StudentIdScope, sequence: u16) -> StudentIdCode {
    StudentIdCode(format!(
        "{}-{}-{}-{sequence:04}",
        scope.year,
        scope.nationality_class.id_prefix(),
        scope.program_code
    ))
}

/// Allocates codes inside a storage transaction with bounded collision retries.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierGenerator {
    max_attempts: u32,
}

impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl IdentifierGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Inserts the application built by `draft` under the next free `APP-` code.
    pub fn issue_application(
        &self,
        tx: &mut dyn PortalTransaction,
        draft: impl Fn(ApplicationCode) -> Application,
    ) -> Result<Application, WorkflowError> {
        self.with_retry(IdentifierKind::Application, tx, |tx, _| {
            let code = application_code(tx.next_sequence(SequenceKind::Application)?);
            let application = draft(code.clone());
            tx.insert_application(application.clone())
                .map_err(|err| duplicate_on_conflict(err, &code))?;
            Ok(application)
        })
    }

    pub fn issue_ticket(
        &self,
        tx: &mut dyn PortalTransaction,
        draft: impl Fn(TicketCode) -> Ticket,
    ) -> Result<Ticket, WorkflowError> {
        self.with_retry(IdentifierKind::Ticket, tx, |tx, _| {
            let code = ticket_code(tx.next_sequence(SequenceKind::Ticket)?);
            let ticket = draft(code.clone());
            tx.insert_ticket(ticket.clone())
                .map_err(|err| duplicate_on_conflict(err, &code))?;
            Ok(ticket)
        })
    }

    /// Certificate codes carry the request second. When that second or a later one is
    /// already taken, the code moves to the second after the highest stored code, keeping
    /// the format and the sort order.
    pub fn issue_certificate(
        &self,
        tx: &mut dyn PortalTransaction,
        requested_at: DateTime<Utc>,
        draft: impl Fn(CertificateCode) -> Certificate,
    ) -> Result<Certificate, WorkflowError> {
        let first_free = first_free_certificate_second(&*tx, requested_at)?;

        self.with_retry(IdentifierKind::Certificate, tx, |tx, attempt| {
            let code = certificate_code(first_free + Duration::seconds(i64::from(attempt)));
            let certificate = draft(code.clone());
            tx.insert_certificate(certificate.clone())
                .map_err(|err| duplicate_on_conflict(err, &code))?;
            Ok(certificate)
        })
    }

    /// Binds the next student ID of the application's (year, class, program) scope.
    pub fn issue_student_id(
        &self,
        tx: &mut dyn PortalTransaction,
        application: &Application,
        nationality_class: NationalityClass,
        issued_at: DateTime<Utc>,
    ) -> Result<StudentIdRecord, WorkflowError> {
        let scope = student_id_scope(issued_at.year(), nationality_class, &application.program);

        self.with_retry(IdentifierKind::StudentId, tx, |tx, _| {
            let sequence = match tx.max_student_sequence(&scope)? {
                None => 1,
                Some(last) if last < MAX_STUDENT_SEQUENCE => last + 1,
                Some(_) => {
                    return Err(WorkflowError::GenerationFailed {
                        kind: IdentifierKind::StudentId,
                        attempts: 1,
                    })
                }
            };

            let record = StudentIdRecord {
                code: student_id_code(&scope, sequence),
                application: application.code.clone(),
                scope: scope.clone(),
                sequence,
                issued_at,
            };
            tx.insert_student_id(record.clone())
                .map_err(|err| duplicate_on_conflict(err, &record.code))?;
            Ok(record)
        })
    }

    fn with_retry<T>(
        &self,
        kind: IdentifierKind,
        tx: &mut dyn PortalTransaction,
        mut attempt: impl FnMut(&mut dyn PortalTransaction, u32) -> Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        for round in 0..self.max_attempts {
            match attempt(&mut *tx, round) {
                Err(WorkflowError::DuplicateIdentifier(code)) => {
                    debug!(%kind, %code, round, "identifier collision, retrying");
                }
                outcome => return outcome,
            }
        }

        Err(WorkflowError::GenerationFailed {
            kind,
            attempts: self.max_attempts,
        })
    }
}

fn first_free_certificate_second(
    tx: &dyn PortalTransaction,
    requested_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, WorkflowError> {
    let Some(latest) = tx.latest_certificate_code()? else {
        return Ok(requested_at);
    };
    if latest < certificate_code(requested_at) {
        return Ok(requested_at);
    }

    let taken = latest
        .0
        .strip_prefix("CERT-")
        .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok());
    Ok(match taken {
        Some(taken) => taken.and_utc() + Duration::seconds(1),
        None => requested_at,
    })
}

fn duplicate_on_conflict(err: RepositoryError, code: &impl fmt::Display) -> WorkflowError {
    match err {
        RepositoryError::Conflict => WorkflowError::DuplicateIdentifier(code.to_string()),
        other => WorkflowError::Persistence(other),
    }
}
