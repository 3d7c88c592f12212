//! Threshold administration: validate, commit an immutable snapshot, then
//! hand the population off to the recalculation job.

use std::sync::Arc;

use rewards_core::event_bus::{make_event, EventPayload, EventSink, EventType};
use rewards_core::thresholds::{
    BenefitMilestones, Draft, MilestoneSnapshot, ThresholdSettings, ThresholdSnapshot,
};
use rewards_core::{LoyaltyError, LoyaltyResult};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::recalc::{RecalculationJob, RecalculationReport};
use crate::settings::ProgramSettings;

/// Returned as soon as the snapshot is durable. The recalculation runs
/// behind `recalculation`.
#[derive(Debug)]
pub struct CommitReceipt {
    pub snapshot: Arc<ThresholdSnapshot>,
    /// The commit turned early access off relative to the previous snapshot.
    pub early_access_disabled: bool,
    pub recalculation: JoinHandle<LoyaltyResult<RecalculationReport>>,
}

pub struct ThresholdAdministrator {
    settings: Arc<ProgramSettings>,
    job: Arc<RecalculationJob>,
    events: Arc<dyn EventSink>,
    runtime: Handle,
}

impl ThresholdAdministrator {
    pub fn new(
        settings: Arc<ProgramSettings>,
        job: Arc<RecalculationJob>,
        events: Arc<dyn EventSink>,
        runtime: Handle,
    ) -> Self {
        Self {
            settings,
            job,
            events,
            runtime,
        }
    }

    /// Validate and persist a new threshold snapshot, then schedule the
    /// recalculation job against it. Invalid drafts write nothing.
    pub fn commit(&self, draft: Draft<ThresholdSettings>) -> LoyaltyResult<CommitReceipt> {
        if let Err(e) = draft.settings.validate() {
            metrics::counter!("loyalty.thresholds_rejected").increment(1);
            warn!(updated_by = ?draft.updated_by, error = %e, "Threshold commit rejected");
            return Err(e);
        }

        // Seed the defaults first so the commit never lands as version 1.
        self.settings.thresholds()?;
        let snapshot = self.settings.threshold_store().append(draft)?;
        let early_access_disabled = self.disabled_early_access(&snapshot)?;

        metrics::counter!("loyalty.thresholds_committed").increment(1);
        info!(
            version = snapshot.version,
            updated_by = ?snapshot.updated_by,
            early_access = snapshot.settings.early_access_enabled,
            early_access_disabled,
            "Threshold snapshot committed"
        );
        self.events.emit(make_event(
            EventType::ThresholdsCommitted,
            EventPayload::Config {
                version: snapshot.version,
                updated_by: snapshot.updated_by.clone(),
            },
        ));

        let recalculation = self.job.schedule(&self.runtime, snapshot.version);
        Ok(CommitReceipt {
            snapshot,
            early_access_disabled,
            recalculation,
        })
    }

    pub fn commit_milestones(
        &self,
        draft: Draft<BenefitMilestones>,
    ) -> LoyaltyResult<Arc<MilestoneSnapshot>> {
        draft.settings.validate()?;
        let snapshot = self.settings.milestone_store().append(draft)?;
        info!(
            version = snapshot.version,
            updated_by = ?snapshot.updated_by,
            "Milestone snapshot committed"
        );
        self.events.emit(make_event(
            EventType::MilestonesCommitted,
            EventPayload::Config {
                version: snapshot.version,
                updated_by: snapshot.updated_by.clone(),
            },
        ));
        Ok(snapshot)
    }

    pub fn current(&self) -> LoyaltyResult<Arc<ThresholdSnapshot>> {
        self.settings.thresholds()
    }

    pub fn current_milestones(&self) -> LoyaltyResult<Arc<MilestoneSnapshot>> {
        self.settings.milestones()
    }

    /// Every threshold snapshot, oldest first.
    pub fn history(&self) -> LoyaltyResult<Vec<Arc<ThresholdSnapshot>>> {
        self.settings.threshold_store().history()
    }

    pub fn get(&self, version: u64) -> LoyaltyResult<Arc<ThresholdSnapshot>> {
        self.settings
            .threshold_store()
            .get(version)?
            .ok_or(LoyaltyError::ThresholdsNotFound)
    }

    /// Whether the latest commit switched early access off.
    pub fn early_access_just_disabled(&self) -> LoyaltyResult<bool> {
        match self.settings.threshold_store().latest()? {
            Some(latest) => self.disabled_early_access(&latest),
            None => Ok(false),
        }
    }

    /// Whether `snapshot` switched early access off relative to the entry
    /// logged directly before it.
    fn disabled_early_access(&self, snapshot: &ThresholdSnapshot) -> LoyaltyResult<bool> {
        let history = self.history()?;
        let previous = history
            .iter()
            .rev()
            .find(|s| s.version < snapshot.version);
        Ok(previous.is_some_and(|p| {
            p.settings.early_access_enabled && !snapshot.settings.early_access_enabled
        }))
    }
}
