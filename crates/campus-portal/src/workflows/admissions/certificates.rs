use tracing::info;

use super::domain::{
    Certificate, CertificateCode, CertificateRequest, CertificateStatus, PaymentStatus, Principal,
    Role,
};
use super::files::FileStore;
use super::ledger::{certificate_amount, load_certificate};
use super::repository::PortalStore;
use super::service::{
    ensure_visible, load_user, require_role, required, AdmissionsService, WorkflowError,
};

impl<S, F> AdmissionsService<S, F>
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    /// Opens a certificate request awaiting payment.
    pub fn request_certificate(
        &self,
        principal: Principal,
        request: CertificateRequest,
    ) -> Result<Certificate, WorkflowError> {
        require_role(principal, Role::Student, "request certificates")?;
        let certificate_type = required(&request.certificate_type, "certificate type")?;
        let purpose = required(&request.purpose, "purpose")?;
        if request.copies == 0 {
            return Err(WorkflowError::InvalidInput(
                "at least one copy must be requested".to_string(),
            ));
        }
        certificate_amount(&self.policy.fees, request.copies)?;

        self.execute(|tx, _, now| {
            let student = load_user(tx, principal.user_id)?;
            let certificate = self.identifiers.issue_certificate(tx, now, |code| Certificate {
                code,
                owner: student.id,
                certificate_type: certificate_type.clone(),
                purpose: purpose.clone(),
                copies: request.copies,
                status: CertificateStatus::PendingPayment,
                payment_status: PaymentStatus::Pending,
                requested_at: now,
                processing_notes: None,
            })?;

            info!(certificate = %certificate.code, copies = certificate.copies, "certificate requested");
            Ok(certificate)
        })
    }

    /// Staff hand-off: a paid, processing certificate becomes ready for pickup.
    pub fn mark_certificate_ready(
        &self,
        principal: Principal,
        code: &CertificateCode,
        notes: Option<String>,
    ) -> Result<Certificate, WorkflowError> {
        require_role(principal, Role::Admin, "mark certificates ready")?;

        self.execute(|tx, outbox, now| {
            let mut certificate = load_certificate(tx, code)?;
            if certificate.status != CertificateStatus::Processing
                || certificate.payment_status != PaymentStatus::Paid
            {
                return Err(WorkflowError::InvalidTransition {
                    entity: "certificate",
                    id: code.to_string(),
                    state: certificate.status.label(),
                    action: "become ready for pickup",
                });
            }

            certificate.status = CertificateStatus::ReadyForPickup;
            if let Some(notes) = notes.map(|notes| notes.trim().to_string()) {
                if !notes.is_empty() {
                    certificate.processing_notes = Some(notes);
                }
            }
            tx.update_certificate(certificate.clone())?;
            outbox.emit(
                tx,
                certificate.owner,
                format!(
                    "Your certificate \"{}\" ({code}) is ready for pickup.",
                    certificate.certificate_type
                ),
                now,
            )?;

            info!(certificate = %code, "certificate ready for pickup");
            Ok(certificate)
        })
    }

    pub fn certificate(
        &self,
        principal: Principal,
        code: &CertificateCode,
    ) -> Result<Certificate, WorkflowError> {
        self.store.read(|tx| {
            let certificate = load_certificate(tx, code)?;
            ensure_visible(principal, certificate.owner, "view this certificate")?;
            Ok(certificate)
        })
    }

    /// Own requests for students, every request for staff; newest first.
    pub fn certificates(&self, principal: Principal) -> Result<Vec<Certificate>, WorkflowError> {
        let owner = (!principal.is_admin()).then_some(principal.user_id);
        self.store.read(|tx| Ok(tx.certificates(owner)?))
    }
}
