use crate::infra::{seed_reference_data, InMemoryAuditSink, InMemoryNotifier, PinnedClock};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use clap::Args;
use rideshare_kyc::config::AppEnvironment;
use rideshare_kyc::verification::{
    AuditRecord, CallerSession, CarRegistration, CardType, Collaborators, DocumentRef,
    DocumentSubmission, DriverLicenseSubmission, Evidence, IdentityCardSubmission,
    InMemoryBlobStore, InMemoryVerificationStore, InsuranceSubmission, InsurerId, ReviewRequest,
    ReviewerSession, SnapshotView, VehicleCardSubmission, VerificationError, VerificationEvent,
    VerificationService,
};
use rideshare_kyc::AppError;
use std::sync::Arc;

type DemoService = VerificationService<InMemoryVerificationStore, InMemoryBlobStore>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the scripted run happens on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Reject the first identity card and resubmit it before moving on.
    #[arg(long)]
    pub(crate) reject_identity: bool,
}

pub(crate) struct DemoTranscript {
    pub(crate) progress: SnapshotView,
    pub(crate) events: Vec<VerificationEvent>,
    pub(crate) audit: Vec<AuditRecord>,
    pub(crate) stored_objects: Vec<String>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    println!("Driver onboarding demo ({today})");

    let transcript = run_script(today, args.reject_identity, |line| println!("{line}"))?;

    println!("\nNotifications");
    for event in &transcript.events {
        println!(
            "- {} {} {} -> {} by {}",
            event.template(),
            event.document.kind,
            event.document.id,
            event.owner,
            event.actor
        );
    }
    println!("\nAudited failures");
    if transcript.audit.is_empty() {
        println!("- none");
    }
    for record in &transcript.audit {
        println!("- [{}] {}: {}", record.origin, record.code, record.message);
    }
    println!("\nStored evidence objects: {}", transcript.stored_objects.len());
    println!(
        "Onboarding complete: {}",
        if transcript.progress.complete { "yes" } else { "no" }
    );
    Ok(())
}

pub(crate) fn run_script(
    today: NaiveDate,
    reject_identity: bool,
    mut say: impl FnMut(String),
) -> Result<DemoTranscript, AppError> {
    let store = Arc::new(InMemoryVerificationStore::default());
    seed_reference_data(&store, AppEnvironment::Production).map_err(VerificationError::from)?;
    let user = store
        .seed_user("+15550142", "Noor", "Haddad")
        .map_err(VerificationError::from)?;
    let insurer = InsurerId(1);

    let blobs = Arc::new(InMemoryBlobStore::default());
    let notifier = InMemoryNotifier::default();
    let audit = InMemoryAuditSink::default();
    let now = today
        .and_hms_opt(9, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now);
    let service: DemoService = VerificationService::new(
        store,
        blobs.clone(),
        5 * 1024 * 1024,
        Collaborators {
            notifier: Arc::new(notifier.clone()),
            audit: Arc::new(audit.clone()),
            clock: Arc::new(PinnedClock(now)),
        },
    );

    let driver = CallerSession { caller: user.id };
    let reviewer = ReviewerSession {
        reviewer: "ops-demo".to_string(),
    };
    let session = Some(&driver);
    let photos = || Evidence::images(b"front-photo".to_vec(), b"back-photo".to_vec());
    let identity = || {
        DocumentSubmission::IdentityCard(IdentityCardSubmission {
            id_number: "4410023344".to_string(),
            evidence: photos(),
        })
    };

    let progress = service.snapshot(session)?;
    say(step_line("start", &progress));

    let mut documents: Vec<DocumentRef> = Vec::new();
    let submitted = service.submit(session, identity())?;
    say(step_line("identity card submitted", &submitted.progress));

    if reject_identity {
        let rejected = service.reject(
            Some(&reviewer),
            ReviewRequest::new(submitted.result.document),
            "photo is blurred",
        )?;
        say(step_line("identity card rejected", &rejected.progress));
        let resubmitted = service.submit(session, identity())?;
        say(step_line("identity card resubmitted", &resubmitted.progress));
        documents.push(resubmitted.result.document);
    } else {
        documents.push(submitted.result.document);
        if let Err(err) = service.submit(session, identity()) {
            say(format!("- duplicate identity refused: {}", err.code()));
        }
    }

    let license = service.submit(
        session,
        DocumentSubmission::DriverLicense(DriverLicenseSubmission {
            expiration_date: today + Duration::days(3 * 365),
            evidence: photos(),
        }),
    )?;
    say(step_line("driver license submitted", &license.progress));
    documents.push(license.result.document);

    let year = u16::try_from(today.year() - 3)
        .map_err(|_| VerificationError::invalid("year", "demo date is out of range"))?;
    let car = service.register_car(
        session,
        CarRegistration {
            plate: "KA 01 AB 1234".to_string(),
            brand: "Hyundai".to_string(),
            model: "i20".to_string(),
            color: "silver".to_string(),
            year,
        },
    )?;
    say(step_line(
        &format!("car {} registered", car.result.car.plate),
        &car.progress,
    ));
    let car_id = car.result.car.id;

    let insurance = service.submit(
        session,
        DocumentSubmission::Insurance(InsuranceSubmission {
            car_id,
            policy_number: "HA-7781".to_string(),
            insurer_id: insurer,
            start_date: today - Duration::days(30),
            expire_date: today + Duration::days(335),
            evidence: Evidence::pdf(b"%PDF-1.7".to_vec()),
        }),
    )?;
    say(step_line("insurance submitted", &insurance.progress));
    documents.push(insurance.result.document);

    let card = service.submit(
        session,
        DocumentSubmission::VehicleCard(VehicleCardSubmission {
            car_id,
            card_type: CardType::Green,
            evidence: photos(),
        }),
    )?;
    say(step_line("green card submitted", &card.progress));
    documents.push(card.result.document);

    for document in documents {
        let approved = service.approve(Some(&reviewer), ReviewRequest::new(document))?;
        say(step_line(
            &format!("{} approved", document.kind),
            &approved.progress,
        ));
    }

    let progress = service.snapshot(session)?;
    Ok(DemoTranscript {
        progress,
        events: notifier.events(),
        audit: audit.records(),
        stored_objects: blobs.keys(),
    })
}

fn step_line(label: &str, progress: &SnapshotView) -> String {
    if progress.complete {
        format!("- {label}: onboarding complete")
    } else {
        format!("- {label}: next step {}", progress.next_step.label())
    }
}
