use campus_portal::error::AppError;
use campus_portal::workflows::admissions::{
    AdmissionsService, ApplicationSubmission, CertificateRequest, InMemoryFileStore,
    InMemoryPortalStore, NewStudent, NewTicket, PortalPolicy, ReviewDecision, StudyLevel,
};
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Nationality declared by the demo student
    #[arg(long, default_value = "Egyptian")]
    pub(crate) nationality: String,
    /// Program the demo student applies to
    #[arg(long, default_value = "Computer Science")]
    pub(crate) program: String,
    /// Skip the certificate and support-ticket portion of the demo
    #[arg(long)]
    pub(crate) skip_services: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        nationality,
        program,
        skip_services,
    } = args;

    let service = AdmissionsService::new(
        Arc::new(InMemoryPortalStore::new()),
        Arc::new(InMemoryFileStore::default()),
        PortalPolicy::default(),
    );

    println!("Campus portal demo");
    let admin = service.ensure_admin("registrar@example.com", "Admissions Office")?;
    let student = service.register_student(NewStudent {
        email: "demo.student@example.com".to_string(),
        full_name: "Demo Student".to_string(),
        phone: None,
        nationality,
    })?;
    println!(
        "- registered {} ({}, {})",
        student.full_name,
        student.nationality,
        student.nationality_class.label()
    );

    let application = service.submit_application(
        student.principal(),
        ApplicationSubmission {
            program,
            level: StudyLevel::Diploma,
        },
    )?;
    println!(
        "- submitted {} for {} [{}]",
        application.code,
        application.program,
        application.status.label()
    );

    let reviewed =
        service.review_application(admin.principal(), &application.code, ReviewDecision::Approve)?;
    println!("- review: {}", reviewed.status.label());

    let fee = service.application_fee_for(student.principal(), &application.code)?;
    let receipt =
        service.record_application_payment(student.principal(), &application.code, "card")?;
    println!(
        "- paid {fee} by {} (reference {})",
        receipt.payment.method, receipt.payment.transaction_code
    );

    let record = service.generate_student_id(admin.principal(), &application.code)?;
    println!("- student ID issued: {}", record.code);

    if !skip_services {
        let certificate = service.request_certificate(
            student.principal(),
            CertificateRequest {
                certificate_type: "Enrollment".to_string(),
                purpose: "Visa application".to_string(),
                copies: 2,
            },
        )?;
        service.record_certificate_payment(student.principal(), &certificate.code, "cash")?;
        let ready = service.mark_certificate_ready(
            admin.principal(),
            &certificate.code,
            Some("Collect from the registrar's desk".to_string()),
        )?;
        println!(
            "- certificate {} ({} copies): {}",
            ready.code,
            ready.copies,
            ready.status.label()
        );

        let ticket = service.open_ticket(
            student.principal(),
            NewTicket {
                subject: "Student card".to_string(),
                message: "When can I collect my card?".to_string(),
            },
        )?;
        let ticket =
            service.reply_to_ticket(admin.principal(), &ticket.code, "From next Sunday.")?;
        println!(
            "- ticket {} \"{}\": {} ({} messages)",
            ticket.code,
            ticket.subject,
            ticket.status.label(),
            ticket.messages.len()
        );
    }

    let feed = service.notifications(student.principal())?;
    println!("\nNotifications ({} unread)", feed.unread);
    for notification in feed.notifications.iter().rev() {
        println!("  * {}", notification.message);
    }

    let dashboard = service.admin_dashboard(admin.principal())?;
    println!(
        "\nDashboard: {} pending review, {} awaiting payment, {} certificate requests, {} open tickets",
        dashboard.pending_review,
        dashboard.awaiting_payment,
        dashboard.certificate_requests,
        dashboard.open_tickets
    );

    Ok(())
}
