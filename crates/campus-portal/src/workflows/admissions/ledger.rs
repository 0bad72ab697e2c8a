use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    Application, ApplicationCode, Certificate, CertificateCode, CertificateStatus, FundedEntity,
    NationalityClass, Payment, PaymentId, PaymentStatus, Principal, Role,
};
use super::files::FileStore;
use super::identifiers::transaction_code;
use super::repository::{PortalStore, PortalTransaction, SequenceKind};
use super::service::{
    ensure_visible, load_application, load_user, require_role, required, AdmissionsService,
    WorkflowError,
};

/// Fee rates in whole currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub local_application: u32,
    pub international_application: u32,
    pub certificate_per_copy: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            local_application: 600,
            international_application: 1500,
            certificate_per_copy: 200,
        }
    }
}

impl FeeSchedule {
    pub const fn application_fee(&self, class: NationalityClass) -> u32 {
        match class {
            NationalityClass::Local => self.local_application,
            NationalityClass::International => self.international_application,
        }
    }

    /// `None` when the total does not fit the ledger's amount type.
    pub const fn certificate_fee(&self, copies: u32) -> Option<u32> {
        self.certificate_per_copy.checked_mul(copies)
    }
}

pub(crate) fn certificate_amount(fees: &FeeSchedule, copies: u32) -> Result<u32, WorkflowError> {
    fees.certificate_fee(copies).ok_or_else(|| {
        WorkflowError::InvalidInput(format!("{copies} copies exceed the payable certificate fee"))
    })
}

/// Payment that was just recorded together with the state it unlocked.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt<T> {
    pub payment: Payment,
    pub record: T,
}

impl<S, F> AdmissionsService<S, F>
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    /// Fee owed for an application, from its owner's nationality class.
    pub fn application_fee_for(
        &self,
        principal: Principal,
        code: &ApplicationCode,
    ) -> Result<u32, WorkflowError> {
        self.store.read(|tx| {
            let application = load_application(tx, code)?;
            ensure_visible(principal, application.owner, "view this application fee")?;
            let owner = load_user(tx, application.owner)?;
            Ok(self.policy.fees.application_fee(owner.nationality_class))
        })
    }

    pub fn certificate_fee_for(
        &self,
        principal: Principal,
        code: &CertificateCode,
    ) -> Result<u32, WorkflowError> {
        self.store.read(|tx| {
            let certificate = load_certificate(tx, code)?;
            ensure_visible(principal, certificate.owner, "view this certificate fee")?;
            certificate_amount(&self.policy.fees, certificate.copies)
        })
    }

    /// Settles the application fee; the payment record and `Paid` commit together.
    pub fn record_application_payment(
        &self,
        principal: Principal,
        code: &ApplicationCode,
        method: &str,
    ) -> Result<PaymentReceipt<Application>, WorkflowError> {
        require_role(principal, Role::Student, "pay application fees")?;
        let method = required(method, "payment method")?;

        self.execute(|tx, outbox, now| {
            let mut application = load_application(tx, code)?;
            if !principal.owns(application.owner) {
                return Err(WorkflowError::Unauthorized {
                    action: "pay for another student's application",
                });
            }
            if application.payment_status == PaymentStatus::Paid {
                return Err(WorkflowError::InvalidTransition {
                    entity: "application",
                    id: code.to_string(),
                    state: "paid",
                    action: "accept another payment",
                });
            }
            if application.status.is_terminal() {
                return Err(WorkflowError::InvalidTransition {
                    entity: "application",
                    id: code.to_string(),
                    state: application.status.label(),
                    action: "accept a payment",
                });
            }

            let payer = load_user(tx, principal.user_id)?;
            let amount = self.policy.fees.application_fee(payer.nationality_class);
            let payment = append_payment(
                tx,
                principal,
                FundedEntity::Application(code.clone()),
                amount,
                method,
                now,
            )?;

            application.payment_status = PaymentStatus::Paid;
            tx.update_application(application.clone())?;
            outbox.emit(
                tx,
                application.owner,
                format!(
                    "Payment of {amount} received for application {code}. Reference: {}",
                    payment.transaction_code
                ),
                now,
            )?;

            info!(application = %code, amount, reference = %payment.transaction_code, "application fee paid");
            Ok(PaymentReceipt {
                payment,
                record: application,
            })
        })
    }

    /// Pays for a certificate request and moves it into processing.
    pub fn record_certificate_payment(
        &self,
        principal: Principal,
        code: &CertificateCode,
        method: &str,
    ) -> Result<PaymentReceipt<Certificate>, WorkflowError> {
        require_role(principal, Role::Student, "pay certificate fees")?;
        let method = required(method, "payment method")?;

        self.execute(|tx, outbox, now| {
            let mut certificate = load_certificate(tx, code)?;
            if !principal.owns(certificate.owner) {
                return Err(WorkflowError::Unauthorized {
                    action: "pay for another student's certificate",
                });
            }
            if certificate.status != CertificateStatus::PendingPayment {
                return Err(WorkflowError::InvalidTransition {
                    entity: "certificate",
                    id: code.to_string(),
                    state: certificate.status.label(),
                    action: "accept a payment",
                });
            }

            let amount = certificate_amount(&self.policy.fees, certificate.copies)?;
            let payment = append_payment(
                tx,
                principal,
                FundedEntity::Certificate(code.clone()),
                amount,
                method,
                now,
            )?;

            certificate.status = CertificateStatus::Processing;
            certificate.payment_status = PaymentStatus::Paid;
            tx.update_certificate(certificate.clone())?;

            let student = load_user(tx, certificate.owner)?;
            outbox.emit(
                tx,
                certificate.owner,
                format!(
                    "Payment received for certificate {code}. Your request is now being processed."
                ),
                now,
            )?;
            outbox.emit_to_admins(
                tx,
                &format!(
                    "Certificate {code} ({}) paid by {}",
                    certificate.certificate_type, student.full_name
                ),
                now,
            )?;

            info!(certificate = %code, amount, reference = %payment.transaction_code, "certificate fee paid");
            Ok(PaymentReceipt {
                payment,
                record: certificate,
            })
        })
    }

    pub fn payments_for(
        &self,
        principal: Principal,
        funds: &FundedEntity,
    ) -> Result<Vec<Payment>, WorkflowError> {
        self.store.read(|tx| {
            let owner = match funds {
                FundedEntity::Application(code) => load_application(tx, code)?.owner,
                FundedEntity::Certificate(code) => load_certificate(tx, code)?.owner,
            };
            ensure_visible(principal, owner, "view these payments")?;
            Ok(tx.payments_for(funds)?)
        })
    }
}

fn append_payment(
    tx: &mut dyn PortalTransaction,
    principal: Principal,
    funds: FundedEntity,
    amount: u32,
    method: String,
    now: DateTime<Utc>,
) -> Result<Payment, WorkflowError> {
    let sequence = tx.next_sequence(SequenceKind::Payment)?;
    let payment = Payment {
        id: PaymentId(sequence),
        payer: principal.user_id,
        funds,
        amount,
        method,
        transaction_code: transaction_code(now, sequence),
        paid_at: now,
    };
    tx.insert_payment(payment.clone())?;
    Ok(payment)
}

pub(crate) fn load_certificate(
    tx: &dyn PortalTransaction,
    code: &CertificateCode,
) -> Result<Certificate, WorkflowError> {
    tx.certificate(code)?.ok_or_else(|| WorkflowError::NotFound {
        entity: "certificate",
        id: code.to_string(),
    })
}
