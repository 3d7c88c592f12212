//! Loyalty engine: wires the ledger, administrator, recalculation job and
//! card service over a shared set of stores.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rewards_core::config::EngineConfig;
use rewards_core::event_bus::EventSink;
use rewards_core::loyalty::{LoyaltyCard, TierDecision};
use rewards_core::thresholds::{
    BenefitMilestones, Draft, MilestoneSnapshot, ThresholdSettings, ThresholdSnapshot,
};
use rewards_core::{LoyaltyError, LoyaltyResult};
use rewards_store::{
    CardRepository, InMemoryCardRepository, InMemorySnapshotStore, UserDirectory,
};
use tokio::runtime::Handle;
use tracing::info;

use crate::admin::{CommitReceipt, ThresholdAdministrator};
use crate::cards::{
    CardListing, CardQuery, CardService, CardValidation, CardView, LoyaltyStats, SweepReport,
};
use crate::issuer::CardIssuer;
use crate::ledger::{AwardReceipt, PointsLedger};
use crate::recalc::{RecalculationJob, RecalculationReport};
use crate::resolver::resolve_card;
use crate::settings::{MilestoneStore, ProgramSettings, ThresholdStore};

/// Storage the engine runs over.
pub struct EngineStores {
    pub users: Arc<dyn UserDirectory>,
    pub cards: Arc<dyn CardRepository>,
    pub thresholds: Arc<ThresholdStore>,
    pub milestones: Arc<MilestoneStore>,
}

impl EngineStores {
    /// In-memory cards and snapshots over the given user directory.
    pub fn in_memory(users: Arc<dyn UserDirectory>) -> Self {
        Self {
            users,
            cards: Arc::new(InMemoryCardRepository::new()),
            thresholds: Arc::new(InMemorySnapshotStore::<ThresholdSettings>::new("thresholds")),
            milestones: Arc::new(InMemorySnapshotStore::<BenefitMilestones>::new("milestones")),
        }
    }
}

pub struct LoyaltyEngine {
    node_id: String,
    users: Arc<dyn UserDirectory>,
    cards: Arc<dyn CardRepository>,
    settings: Arc<ProgramSettings>,
    ledger: PointsLedger,
    administrator: ThresholdAdministrator,
    job: Arc<RecalculationJob>,
    service: CardService,
}

impl LoyaltyEngine {
    pub fn new(
        config: &EngineConfig,
        stores: EngineStores,
        events: Arc<dyn EventSink>,
        runtime: Handle,
    ) -> LoyaltyResult<Self> {
        config.validate()?;
        let EngineStores {
            users,
            cards,
            thresholds,
            milestones,
        } = stores;

        let settings = Arc::new(ProgramSettings::new(
            thresholds,
            milestones,
            config.thresholds.settings(),
        ));
        let issuer = Arc::new(CardIssuer::new(cards.clone(), &config.cards));
        let job = Arc::new(RecalculationJob::new(
            cards.clone(),
            users.clone(),
            settings.clone(),
            events.clone(),
            &config.recalculation,
        ));

        let ledger = PointsLedger::new(
            cards.clone(),
            users.clone(),
            settings.clone(),
            issuer.clone(),
            events.clone(),
        );
        let administrator =
            ThresholdAdministrator::new(settings.clone(), job.clone(), events.clone(), runtime);
        let service = CardService::new(
            cards.clone(),
            users.clone(),
            settings.clone(),
            issuer,
            events,
            config.cards.listing_page_limit,
            config.recalculation.page_size,
        );

        info!(
            node_id = %config.node_id,
            card_prefix = %config.cards.number_prefix,
            page_size = config.recalculation.page_size,
            early_access = config.thresholds.early_access_enabled,
            "Loyalty engine initialized"
        );

        Ok(Self {
            node_id: config.node_id.clone(),
            users,
            cards,
            settings,
            ledger,
            administrator,
            job,
            service,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    // ─── Points ─────────────────────────────────────────────────────────────

    pub fn award(&self, user_id: &str, points: i64, reason: &str) -> LoyaltyResult<AwardReceipt> {
        self.ledger.award(user_id, points, reason)
    }

    pub fn reset_points(&self, user_id: &str, authorized_by: &str) -> LoyaltyResult<LoyaltyCard> {
        self.ledger.reset_points(user_id, authorized_by)
    }

    /// Tier the user would resolve to right now, without persisting it.
    pub fn preview_tier(&self, user_id: &str) -> LoyaltyResult<TierDecision> {
        let user = self
            .users
            .find(user_id)?
            .ok_or_else(|| LoyaltyError::UserNotFound(user_id.to_string()))?;
        let card = self
            .cards
            .find_by_user(user_id)?
            .ok_or_else(|| LoyaltyError::CardNotFound(user_id.to_string()))?;
        let thresholds = self.settings.thresholds()?;
        Ok(resolve_card(&card, user.is_admin, &thresholds.settings))
    }

    // ─── Configuration ──────────────────────────────────────────────────────

    pub fn commit_thresholds(
        &self,
        draft: Draft<ThresholdSettings>,
    ) -> LoyaltyResult<CommitReceipt> {
        self.administrator.commit(draft)
    }

    pub fn commit_milestones(
        &self,
        draft: Draft<BenefitMilestones>,
    ) -> LoyaltyResult<Arc<MilestoneSnapshot>> {
        self.administrator.commit_milestones(draft)
    }

    pub fn thresholds(&self) -> LoyaltyResult<Arc<ThresholdSnapshot>> {
        self.administrator.current()
    }

    pub fn milestones(&self) -> LoyaltyResult<Arc<MilestoneSnapshot>> {
        self.administrator.current_milestones()
    }

    pub fn threshold_history(&self) -> LoyaltyResult<Vec<Arc<ThresholdSnapshot>>> {
        self.administrator.history()
    }

    pub fn threshold_version(&self, version: u64) -> LoyaltyResult<Arc<ThresholdSnapshot>> {
        self.administrator.get(version)
    }

    pub fn early_access_just_disabled(&self) -> LoyaltyResult<bool> {
        self.administrator.early_access_just_disabled()
    }

    /// Run the recalculation job against the current snapshot and wait.
    pub async fn recalculate(&self) -> LoyaltyResult<RecalculationReport> {
        self.job.run_all().await
    }

    // ─── Cards ──────────────────────────────────────────────────────────────

    pub fn get_card(&self, user_id: &str) -> LoyaltyResult<CardView> {
        self.service.get_card(user_id)
    }

    pub fn validate_card(&self, card_number: &str) -> LoyaltyResult<CardValidation> {
        self.service.validate_card(card_number)
    }

    pub fn list_cards(&self, query: &CardQuery) -> LoyaltyResult<CardListing> {
        self.service.list_cards(query)
    }

    pub fn stats(&self) -> LoyaltyResult<LoyaltyStats> {
        self.service.stats()
    }

    pub fn sweep_expired(&self, now: DateTime<Utc>) -> LoyaltyResult<SweepReport> {
        self.service.sweep_expired(now)
    }
}
