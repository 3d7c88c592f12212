//! Current program configuration: the latest threshold and milestone
//! snapshots, seeded from hard-coded defaults on first use.

use std::sync::Arc;

use rewards_core::thresholds::{
    BenefitMilestones, Draft, MilestoneSnapshot, ThresholdSettings, ThresholdSnapshot,
};
use rewards_core::LoyaltyResult;
use rewards_store::SnapshotStore;

pub type ThresholdStore = dyn SnapshotStore<ThresholdSettings>;
pub type MilestoneStore = dyn SnapshotStore<BenefitMilestones>;

pub struct ProgramSettings {
    thresholds: Arc<ThresholdStore>,
    milestones: Arc<MilestoneStore>,
    threshold_defaults: ThresholdSettings,
}

impl ProgramSettings {
    pub fn new(
        thresholds: Arc<ThresholdStore>,
        milestones: Arc<MilestoneStore>,
        threshold_defaults: ThresholdSettings,
    ) -> Self {
        Self {
            thresholds,
            milestones,
            threshold_defaults,
        }
    }

    /// Latest threshold snapshot; the first call seeds the defaults.
    pub fn thresholds(&self) -> LoyaltyResult<Arc<ThresholdSnapshot>> {
        let defaults = self.threshold_defaults;
        self.thresholds
            .latest_or_init(&|| Draft::new(defaults).with_notes("default thresholds"))
    }

    pub fn milestones(&self) -> LoyaltyResult<Arc<MilestoneSnapshot>> {
        self.milestones.latest_or_init(&|| {
            Draft::new(BenefitMilestones::default()).with_notes("default milestones")
        })
    }

    pub fn threshold_store(&self) -> &Arc<ThresholdStore> {
        &self.thresholds
    }

    pub fn milestone_store(&self) -> &Arc<MilestoneStore> {
        &self.milestones
    }
}
