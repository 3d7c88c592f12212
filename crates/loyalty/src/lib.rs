//! Loyalty tier engine: points ledger, tier resolution, threshold
//! administration and background recalculation.

#![warn(clippy::unwrap_used)]

pub mod admin;
pub mod cards;
pub mod engine;
pub mod issuer;
pub mod ledger;
pub mod notify;
pub mod recalc;
pub mod resolver;
pub mod settings;

pub use admin::{CommitReceipt, ThresholdAdministrator};
pub use cards::{CardListing, CardQuery, CardService, CardValidation, CardView, LoyaltyStats};
pub use engine::{EngineStores, LoyaltyEngine};
pub use ledger::{AwardReceipt, PointsLedger};
pub use notify::ChannelSink;
pub use recalc::{RecalculationJob, RecalculationReport};
pub use resolver::{resolve, Reconcile};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    use std::sync::Arc;

    use rewards_core::config::{CardConfig, RecalculationConfig};
    use rewards_core::event_bus::{capture_sink, CaptureSink};
    use rewards_core::thresholds::{BenefitMilestones, ThresholdSettings};
    use rewards_store::{
        InMemoryCardRepository, InMemorySnapshotStore, InMemoryUserDirectory, UserRecord,
    };
    use tokio::runtime::Handle;

    use crate::admin::ThresholdAdministrator;
    use crate::cards::CardService;
    use crate::issuer::CardIssuer;
    use crate::ledger::PointsLedger;
    use crate::recalc::RecalculationJob;
    use crate::settings::ProgramSettings;

    /// Components wired over in-memory stores. Users: `alice`, `bob` and the
    /// administrator `root`.
    pub struct Fixture {
        pub cards: Arc<InMemoryCardRepository>,
        pub users: Arc<InMemoryUserDirectory>,
        pub settings: Arc<ProgramSettings>,
        pub events: Arc<CaptureSink>,
        pub job: Arc<RecalculationJob>,
        pub ledger: PointsLedger,
        pub service: CardService,
    }

    impl Fixture {
        pub fn new() -> Self {
            let cards = Arc::new(InMemoryCardRepository::new());
            let users = Arc::new(InMemoryUserDirectory::new());
            for (id, name, email, is_admin) in [
                ("alice", "Alice Wambui", "alice@tajicart.example", false),
                ("bob", "Otieno Ochieng", "bob@tajicart.example", false),
                ("root", "Store Admin", "admin@tajicart.example", true),
            ] {
                users.upsert(UserRecord {
                    user_id: id.into(),
                    name: name.into(),
                    email: Some(email.into()),
                    mobile: None,
                    is_admin,
                });
            }

            let settings = Arc::new(ProgramSettings::new(
                Arc::new(InMemorySnapshotStore::<ThresholdSettings>::new("thresholds")),
                Arc::new(InMemorySnapshotStore::<BenefitMilestones>::new("milestones")),
                ThresholdSettings::default(),
            ));
            let events = capture_sink();
            let issuer = Arc::new(CardIssuer::new(cards.clone(), &CardConfig::default()));
            let job = Arc::new(RecalculationJob::new(
                cards.clone(),
                users.clone(),
                settings.clone(),
                events.clone(),
                &RecalculationConfig::default(),
            ));
            let ledger = PointsLedger::new(
                cards.clone(),
                users.clone(),
                settings.clone(),
                issuer.clone(),
                events.clone(),
            );
            let service = CardService::new(
                cards.clone(),
                users.clone(),
                settings.clone(),
                issuer,
                events.clone(),
                10,
                2,
            );

            Self {
                cards,
                users,
                settings,
                events,
                job,
                ledger,
                service,
            }
        }

        /// Needs a running tokio runtime.
        pub fn administrator(&self) -> ThresholdAdministrator {
            ThresholdAdministrator::new(
                self.settings.clone(),
                self.job.clone(),
                self.events.clone(),
                Handle::current(),
            )
        }
    }
}
