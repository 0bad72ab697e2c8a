use super::common::*;
use crate::workflows::admissions::domain::{NewTicket, Role, TicketStatus};
use crate::workflows::admissions::WorkflowError;

fn new_ticket(subject: &str) -> NewTicket {
    NewTicket {
        subject: subject.to_string(),
        message: "My transcript shows the wrong program.".to_string(),
    }
}

#[test]
fn opening_stores_the_first_message() {
    let h = harness();
    let student = h.student("yara@example.com", "Egyptian");

    let ticket = h
        .service
        .open_ticket(student.principal(), new_ticket("Transcript error"))
        .expect("ticket opened");

    assert_eq!(ticket.code.0, "TKT-001");
    assert_eq!(ticket.status, TicketStatus::Open);
    assert_eq!(ticket.messages.len(), 1);
    assert_eq!(ticket.messages[0].sender, Role::Student);
}

#[test]
fn opening_requires_subject_and_message() {
    let h = harness();
    let student = h.student("yara@example.com", "Egyptian");

    let err = h
        .service
        .open_ticket(
            student.principal(),
            NewTicket {
                subject: "Fees".to_string(),
                message: " ".to_string(),
            },
        )
        .expect_err("message required");
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
}

#[test]
fn first_staff_reply_moves_ticket_in_progress_once() {
    let h = harness();
    let student = h.student("yara@example.com", "Egyptian");
    let ticket = h
        .service
        .open_ticket(student.principal(), new_ticket("Transcript error"))
        .expect("ticket opened");

    let after_student = h
        .service
        .reply_to_ticket(student.principal(), &ticket.code, "Any update?")
        .expect("student reply");
    assert_eq!(after_student.status, TicketStatus::Open);

    let after_staff = h
        .service
        .reply_to_ticket(h.admin(), &ticket.code, "Looking into it.")
        .expect("staff reply");
    assert_eq!(after_staff.status, TicketStatus::InProgress);
    assert_eq!(
        h.channel.delivered_to(student.id),
        vec!["New reply to your ticket: Transcript error".to_string()]
    );

    let later = h
        .service
        .reply_to_ticket(h.admin(), &ticket.code, "Fixed.")
        .expect("second staff reply");
    assert_eq!(later.status, TicketStatus::InProgress);
    assert_eq!(later.messages.len(), 4);
    assert_eq!(later.messages[3].sender, Role::Admin);
}

#[test]
fn only_the_owner_closes_and_closed_is_final() {
    let h = harness();
    let owner = h.student("owner@example.com", "Egyptian");
    let other = h.student("other@example.com", "Egyptian");
    let ticket = h
        .service
        .open_ticket(owner.principal(), new_ticket("Housing"))
        .expect("ticket opened");

    let foreign = h
        .service
        .close_ticket(other.principal(), &ticket.code)
        .expect_err("not the owner");
    assert!(matches!(foreign, WorkflowError::Unauthorized { .. }));

    let staff = h
        .service
        .close_ticket(h.admin(), &ticket.code)
        .expect_err("staff cannot close");
    assert!(matches!(staff, WorkflowError::Unauthorized { .. }));

    let stored = h.service.ticket(owner.principal(), &ticket.code).expect("readable");
    assert_eq!(stored.status, TicketStatus::Open);

    let closed = h
        .service
        .close_ticket(owner.principal(), &ticket.code)
        .expect("owner closes");
    assert_eq!(closed.status, TicketStatus::Closed);

    let reply = h
        .service
        .reply_to_ticket(h.admin(), &ticket.code, "Reopening?")
        .expect_err("closed tickets take no replies");
    assert!(matches!(reply, WorkflowError::InvalidTransition { .. }));

    let close_again = h
        .service
        .close_ticket(owner.principal(), &ticket.code)
        .expect_err("already closed");
    assert!(matches!(close_again, WorkflowError::InvalidTransition { .. }));
}

#[test]
fn students_cannot_reply_to_foreign_tickets() {
    let h = harness();
    let owner = h.student("owner@example.com", "Egyptian");
    let other = h.student("other@example.com", "Egyptian");
    let ticket = h
        .service
        .open_ticket(owner.principal(), new_ticket("Housing"))
        .expect("ticket opened");

    let err = h
        .service
        .reply_to_ticket(other.principal(), &ticket.code, "Me too")
        .expect_err("foreign ticket");
    assert!(matches!(err, WorkflowError::Unauthorized { .. }));

    let hidden = h
        .service
        .ticket(other.principal(), &ticket.code)
        .expect_err("foreign ticket hidden");
    assert!(matches!(hidden, WorkflowError::Unauthorized { .. }));
    assert_eq!(h.service.tickets(other.principal()).expect("listing").len(), 0);
    assert_eq!(h.service.tickets(h.admin()).expect("listing").len(), 1);
}

#[test]
fn unregistered_user_cannot_open_a_ticket() {
    let h = harness();

    let err = h
        .service
        .open_ticket(stranger(), new_ticket("Who am I?"))
        .expect_err("unknown owner");

    assert!(matches!(err, WorkflowError::NotFound { entity: "user", .. }));
    assert!(h.service.tickets(h.admin()).expect("listing").is_empty());
}
