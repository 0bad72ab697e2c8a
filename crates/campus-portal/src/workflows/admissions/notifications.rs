use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{Notification, NotificationId, Principal, Role, UserId};
use super::files::FileStore;
use super::repository::{PortalStore, PortalTransaction, RepositoryError, SequenceKind};
use super::service::{AdmissionsService, WorkflowError};

/// Notifications created by one transaction, handed to the delivery channel after commit.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pending: Vec<Notification>,
}

impl Outbox {
    /// Persists a notification for `recipient` as part of the running transaction.
    pub(crate) fn emit(
        &mut self,
        tx: &mut dyn PortalTransaction,
        recipient: UserId,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<NotificationId, RepositoryError> {
        let id = NotificationId(tx.next_sequence(SequenceKind::Notification)?);
        let notification = Notification {
            id,
            recipient,
            message: message.into(),
            read: false,
            created_at: now,
        };
        tx.insert_notification(notification.clone())?;
        self.pending.push(notification);
        Ok(id)
    }

    /// Fans one message out to every admin account.
    pub(crate) fn emit_to_admins(
        &mut self,
        tx: &mut dyn PortalTransaction,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let admins = tx.users_with_role(Role::Admin)?;
        for admin in &admins {
            self.emit(tx, admin.id, message, now)?;
        }
        Ok(admins.len())
    }

    pub(crate) fn deliver(self, channel: &dyn NotificationChannel) {
        for notification in &self.pending {
            if let Err(err) = channel.deliver(notification) {
                warn!(
                    recipient = %notification.recipient,
                    error = %err,
                    "notification delivery failed; record kept"
                );
            }
        }
    }
}

/// Outbound push/e-mail/SMS hook. Delivery runs after the transaction commits and its
/// failures never undo the recorded notification.
pub trait NotificationChannel: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery transport unavailable: {0}")]
    Transport(String),
}

/// Default channel: records the hand-off in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChannel;

impl NotificationChannel for TracingChannel {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        debug!(
            recipient = %notification.recipient,
            id = notification.id.0,
            "notification queued for delivery"
        );
        Ok(())
    }
}

/// A user's notifications, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationFeed {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

impl<S, F> AdmissionsService<S, F>
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    pub fn notifications(&self, principal: Principal) -> Result<NotificationFeed, WorkflowError> {
        self.store.read(|tx| {
            let notifications = tx.notifications_for(principal.user_id)?;
            let unread = notifications.iter().filter(|item| !item.read).count();
            Ok(NotificationFeed {
                unread,
                notifications,
            })
        })
    }

    /// Flips every unread notification of the caller; returns how many changed.
    pub fn mark_all_notifications_read(
        &self,
        principal: Principal,
    ) -> Result<usize, WorkflowError> {
        self.store.transaction(|tx| {
            let mut flipped = 0;
            for mut notification in tx.notifications_for(principal.user_id)? {
                if notification.read {
                    continue;
                }
                notification.read = true;
                tx.update_notification(notification)?;
                flipped += 1;
            }
            Ok(flipped)
        })
    }

    pub fn mark_notification_read(
        &self,
        principal: Principal,
        id: NotificationId,
    ) -> Result<Notification, WorkflowError> {
        self.store.transaction(|tx| {
            let mut notification =
                tx.notification(id)?
                    .ok_or_else(|| WorkflowError::NotFound {
                        entity: "notification",
                        id: id.0.to_string(),
                    })?;

            if notification.recipient != principal.user_id {
                return Err(WorkflowError::Unauthorized {
                    action: "read another user's notification",
                });
            }

            if !notification.read {
                notification.read = true;
                tx.update_notification(notification.clone())?;
            }
            Ok(notification)
        })
    }
}
