use tracing::{info, warn};

use super::domain::{Document, DocumentId, DocumentStatus, DocumentUpload, Principal, Role};
use super::files::{FileRemoval, FileStore};
use super::repository::{PortalStore, SequenceKind};
use super::service::{
    load_application, load_user, require_role, required, AdmissionsService, WorkflowError,
};

impl<S, F> AdmissionsService<S, F>
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    /// Stores the bytes of a registered user, then records the document. A failed record
    /// insert removes the stored bytes again.
    pub fn upload_document(
        &self,
        principal: Principal,
        upload: DocumentUpload,
        bytes: &[u8],
    ) -> Result<Document, WorkflowError> {
        require_role(principal, Role::Student, "upload documents")?;
        let name = required(&upload.name, "document name")?;
        let file_name = required(&upload.file_name, "file name")?;
        self.check_extension(&file_name)?;
        self.store.read(|tx| load_user(tx, principal.user_id))?;

        let declared = format!(
            "{}_{}_{}",
            principal.user_id,
            self.clock.now().format("%Y%m%d%H%M%S"),
            file_name
        );
        let locator = self.files.store(bytes, &declared)?;

        let recorded = self.execute(|tx, _, now| {
            if let Some(code) = &upload.application {
                let application = load_application(tx, code)?;
                if !principal.owns(application.owner) {
                    return Err(WorkflowError::Unauthorized {
                        action: "attach documents to another student's application",
                    });
                }
            }

            let document = Document {
                id: DocumentId(tx.next_sequence(SequenceKind::Document)?),
                owner: principal.user_id,
                application: upload.application.clone(),
                name,
                status: DocumentStatus::Uploaded,
                locator: locator.clone(),
                uploaded_at: now,
            };
            tx.insert_document(document.clone())?;
            Ok(document)
        });

        match recorded {
            Ok(document) => {
                info!(document = %document.id, owner = %principal.user_id, "document uploaded");
                Ok(document)
            }
            Err(err) => {
                if let Err(cleanup) = self.files.delete(&locator) {
                    warn!(locator = %locator.0, error = %cleanup, "orphaned upload left in file store");
                }
                Err(err)
            }
        }
    }

    /// Removes the record first; the stored bytes go afterwards on a best-effort basis.
    pub fn delete_document(
        &self,
        principal: Principal,
        id: DocumentId,
    ) -> Result<Document, WorkflowError> {
        let removed = self.execute(|tx, _, _| {
            let document = tx.document(id)?.ok_or_else(|| WorkflowError::NotFound {
                entity: "document",
                id: id.to_string(),
            })?;
            if !principal.owns(document.owner) {
                return Err(WorkflowError::Unauthorized {
                    action: "delete another user's document",
                });
            }
            tx.remove_document(id)?;
            Ok(document)
        })?;

        match self.files.delete(&removed.locator) {
            Ok(FileRemoval::Removed) => {}
            Ok(FileRemoval::NotFound) => {
                warn!(document = %id, locator = %removed.locator.0, "stored file already missing");
            }
            Err(err) => {
                warn!(document = %id, locator = %removed.locator.0, error = %err, "stored file could not be removed");
            }
        }

        info!(document = %id, "document deleted");
        Ok(removed)
    }

    /// Caller's own documents, newest first.
    pub fn documents(&self, principal: Principal) -> Result<Vec<Document>, WorkflowError> {
        self.store
            .read(|tx| Ok(tx.documents_for(principal.user_id)?))
    }

    fn check_extension(&self, file_name: &str) -> Result<(), WorkflowError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if self
            .policy
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            Ok(())
        } else {
            Err(WorkflowError::InvalidInput(format!(
                "file type of '{file_name}' is not allowed"
            )))
        }
    }
}
