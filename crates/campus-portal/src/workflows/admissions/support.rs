use tracing::info;

use super::domain::{NewTicket, Principal, Role, Ticket, TicketCode, TicketMessage, TicketStatus};
use super::files::FileStore;
use super::repository::{PortalStore, PortalTransaction};
use super::service::{
    ensure_visible, load_user, require_role, required, AdmissionsService, WorkflowError,
};

impl<S, F> AdmissionsService<S, F>
where
    S: PortalStore + 'static,
    F: FileStore + 'static,
{
    /// Opens a ticket together with its first message.
    pub fn open_ticket(
        &self,
        principal: Principal,
        ticket: NewTicket,
    ) -> Result<Ticket, WorkflowError> {
        require_role(principal, Role::Student, "open support tickets")?;
        let subject = required(&ticket.subject, "subject")?;
        let message = required(&ticket.message, "message")?;

        self.execute(|tx, _, now| {
            let owner = load_user(tx, principal.user_id)?;
            let ticket = self.identifiers.issue_ticket(tx, |code| Ticket {
                code,
                owner: owner.id,
                subject: subject.clone(),
                status: TicketStatus::Open,
                created_at: now,
                messages: vec![TicketMessage {
                    sender: Role::Student,
                    body: message.clone(),
                    sent_at: now,
                }],
            })?;

            info!(ticket = %ticket.code, owner = %principal.user_id, "ticket opened");
            Ok(ticket)
        })
    }

    /// Appends a message. The first staff reply moves an open ticket to in-progress.
    pub fn reply_to_ticket(
        &self,
        principal: Principal,
        code: &TicketCode,
        body: &str,
    ) -> Result<Ticket, WorkflowError> {
        let body = required(body, "message")?;

        self.execute(|tx, outbox, now| {
            let mut ticket = load_ticket(tx, code)?;
            if !principal.is_admin() && !principal.owns(ticket.owner) {
                return Err(WorkflowError::Unauthorized {
                    action: "reply to another student's ticket",
                });
            }
            if ticket.status == TicketStatus::Closed {
                return Err(WorkflowError::InvalidTransition {
                    entity: "ticket",
                    id: code.to_string(),
                    state: ticket.status.label(),
                    action: "accept replies",
                });
            }

            ticket.messages.push(TicketMessage {
                sender: principal.role,
                body,
                sent_at: now,
            });
            if principal.is_admin() {
                if ticket.status == TicketStatus::Open {
                    ticket.status = TicketStatus::InProgress;
                }
                outbox.emit(
                    tx,
                    ticket.owner,
                    format!("New reply to your ticket: {}", ticket.subject),
                    now,
                )?;
            }
            tx.update_ticket(ticket.clone())?;

            info!(ticket = %code, sender = principal.role.label(), status = ticket.status.label(), "ticket reply recorded");
            Ok(ticket)
        })
    }

    /// Closes a ticket; only its owner may do so.
    pub fn close_ticket(
        &self,
        principal: Principal,
        code: &TicketCode,
    ) -> Result<Ticket, WorkflowError> {
        self.execute(|tx, _, _| {
            let mut ticket = load_ticket(tx, code)?;
            if !principal.owns(ticket.owner) || principal.role != Role::Student {
                return Err(WorkflowError::Unauthorized {
                    action: "close another user's ticket",
                });
            }
            if ticket.status == TicketStatus::Closed {
                return Err(WorkflowError::InvalidTransition {
                    entity: "ticket",
                    id: code.to_string(),
                    state: ticket.status.label(),
                    action: "be closed again",
                });
            }

            ticket.status = TicketStatus::Closed;
            tx.update_ticket(ticket.clone())?;
            info!(ticket = %code, "ticket closed");
            Ok(ticket)
        })
    }

    pub fn ticket(&self, principal: Principal, code: &TicketCode) -> Result<Ticket, WorkflowError> {
        self.store.read(|tx| {
            let ticket = load_ticket(tx, code)?;
            ensure_visible(principal, ticket.owner, "view this ticket")?;
            Ok(ticket)
        })
    }

    /// Own tickets for students, every ticket for staff; newest first.
    pub fn tickets(&self, principal: Principal) -> Result<Vec<Ticket>, WorkflowError> {
        let owner = (!principal.is_admin()).then_some(principal.user_id);
        self.store.read(|tx| Ok(tx.tickets(owner)?))
    }
}

fn load_ticket(tx: &dyn PortalTransaction, code: &TicketCode) -> Result<Ticket, WorkflowError> {
    tx.ticket(code)?.ok_or_else(|| WorkflowError::NotFound {
        entity: "ticket",
        id: code.to_string(),
    })
}
