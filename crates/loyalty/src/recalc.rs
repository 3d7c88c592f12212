//! Background recalculation of every card after a threshold commit.
//!
//! Cards are walked in user-id order, one page at a time. A failure on one
//! card is logged and counted; it never stops the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rewards_core::config::RecalculationConfig;
use rewards_core::event_bus::{make_event, EventPayload, EventSink, EventType};
use rewards_core::loyalty::{LoyaltyCard, TierChange};
use rewards_core::thresholds::{ThresholdSettings, ThresholdSnapshot};
use rewards_core::LoyaltyResult;
use rewards_store::{CardRepository, UserDirectory};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::resolver::{apply_decision, resolve_card, Reconcile};
use crate::settings::ProgramSettings;

/// Aggregate outcome of one job run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecalculationReport {
    pub snapshot_version: u64,
    pub processed: u64,
    pub updated: u64,
    pub failed: u64,
    pub pages: u64,
    /// A newer snapshot was committed before this run started; nothing was walked.
    pub superseded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct RecalculationJob {
    cards: Arc<dyn CardRepository>,
    users: Arc<dyn UserDirectory>,
    settings: Arc<ProgramSettings>,
    events: Arc<dyn EventSink>,
    page_size: usize,
    delay: Duration,
    /// Serializes runs.
    running: Mutex<()>,
}

impl RecalculationJob {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        users: Arc<dyn UserDirectory>,
        settings: Arc<ProgramSettings>,
        events: Arc<dyn EventSink>,
        config: &RecalculationConfig,
    ) -> Self {
        Self {
            cards,
            users,
            settings,
            events,
            page_size: config.page_size.max(1),
            delay: Duration::from_millis(config.delay_ms),
            running: Mutex::new(()),
        }
    }

    /// Spawn a run for the snapshot committed as `version`. The caller gets
    /// the handle back immediately.
    pub fn schedule(
        self: &Arc<Self>,
        handle: &Handle,
        version: u64,
    ) -> JoinHandle<LoyaltyResult<RecalculationReport>> {
        let job = Arc::clone(self);
        handle.spawn(async move {
            if !job.delay.is_zero() {
                tokio::time::sleep(job.delay).await;
            }
            job.run_scheduled(version).await
        })
    }

    /// Re-resolve every card against the latest snapshot.
    pub async fn run_all(&self) -> LoyaltyResult<RecalculationReport> {
        let _running = self.running.lock().await;
        let snapshot = self.settings.thresholds()?;
        self.walk(&snapshot).await
    }

    /// Skips when a later commit has replaced `version`; that commit's own
    /// run covers the population.
    async fn run_scheduled(&self, version: u64) -> LoyaltyResult<RecalculationReport> {
        let _running = self.running.lock().await;
        let snapshot = self.settings.thresholds()?;
        if snapshot.version > version {
            info!(
                version,
                latest = snapshot.version,
                "Recalculation superseded by a newer snapshot"
            );
            let now = Utc::now();
            return Ok(RecalculationReport {
                snapshot_version: version,
                processed: 0,
                updated: 0,
                failed: 0,
                pages: 0,
                superseded: true,
                started_at: now,
                finished_at: now,
            });
        }
        self.walk(&snapshot).await
    }

    /// Callers hold `running`.
    async fn walk(&self, snapshot: &ThresholdSnapshot) -> LoyaltyResult<RecalculationReport> {
        let started_at = Utc::now();
        let mut report = RecalculationReport {
            snapshot_version: snapshot.version,
            processed: 0,
            updated: 0,
            failed: 0,
            pages: 0,
            superseded: false,
            started_at,
            finished_at: started_at,
        };
        info!(
            version = snapshot.version,
            early_access = snapshot.settings.early_access_enabled,
            page_size = self.page_size,
            "Recalculation started"
        );

        let mut cursor: Option<String> = None;
        loop {
            let page = self.cards.page_after(cursor.as_deref(), self.page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.user_id.clone());
            report.pages += 1;

            for card in &page {
                report.processed += 1;
                match self.recalculate_card(card, &snapshot.settings) {
                    Ok(Some(change)) => {
                        report.updated += 1;
                        debug!(
                            user_id = %card.user_id,
                            old = %change.from,
                            new = %change.to,
                            method = ?change.method,
                            "Card recalculated"
                        );
                        if change.from != change.to {
                            self.events.emit(make_event(
                                EventType::TierChanged,
                                EventPayload::Tier {
                                    user_id: card.user_id.clone(),
                                    card_number: card.card_number.clone(),
                                    from: change.from,
                                    to: change.to,
                                    method: change.method,
                                },
                            ));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            user_id = %card.user_id,
                            card_number = %card.card_number,
                            error = %e,
                            "Card recalculation failed"
                        );
                    }
                }
            }

            let short_page = page.len() < self.page_size;
            drop(page);
            if short_page {
                break;
            }
            tokio::task::yield_now().await;
        }

        report.finished_at = Utc::now();
        metrics::counter!("loyalty.recalc.processed").increment(report.processed);
        metrics::counter!("loyalty.recalc.updated").increment(report.updated);
        metrics::counter!("loyalty.recalc.failed").increment(report.failed);
        info!(
            version = report.snapshot_version,
            processed = report.processed,
            updated = report.updated,
            failed = report.failed,
            pages = report.pages,
            "Recalculation finished"
        );
        self.events.emit(make_event(
            EventType::RecalculationCompleted,
            EventPayload::Recalculation {
                version: report.snapshot_version,
                processed: report.processed,
                updated: report.updated,
                failed: report.failed,
            },
        ));
        Ok(report)
    }

    /// `Some` when the stored card changed.
    fn recalculate_card(
        &self,
        card: &LoyaltyCard,
        settings: &ThresholdSettings,
    ) -> LoyaltyResult<Option<TierChange>> {
        card.verify()?;
        // Users missing from the directory are resolved as regular members.
        let is_admin = self
            .users
            .find(&card.user_id)?
            .is_some_and(|u| u.is_admin);

        let now = Utc::now();
        let mut change = None;
        // Resolve against the stored card, not the page copy.
        self.cards
            .update(&card.user_id, &mut |stored: &mut LoyaltyCard| {
                change = if is_admin {
                    stored.normalize_admin(now)
                } else {
                    let decision = resolve_card(stored, false, settings);
                    apply_decision(stored, &decision, Reconcile::TierAndMethod, now)
                };
                Ok(())
            })?;
        Ok(change)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rewards_core::event_bus::capture_sink;
    use rewards_core::loyalty::{AcquisitionMethod, Tier};
    use rewards_core::thresholds::{BenefitMilestones, Draft};
    use rewards_store::{
        InMemoryCardRepository, InMemorySnapshotStore, InMemoryUserDirectory, UserRecord,
    };

    type Setup = (
        Arc<InMemoryCardRepository>,
        Arc<InMemoryUserDirectory>,
        Arc<ProgramSettings>,
        RecalculationJob,
    );

    fn setup(page_size: usize) -> Setup {
        let cards = Arc::new(InMemoryCardRepository::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let settings = Arc::new(ProgramSettings::new(
            Arc::new(InMemorySnapshotStore::<ThresholdSettings>::new("thresholds")),
            Arc::new(InMemorySnapshotStore::<BenefitMilestones>::new("milestones")),
            ThresholdSettings::default(),
        ));
        let config = RecalculationConfig {
            page_size,
            delay_ms: 0,
        };
        let job = RecalculationJob::new(
            cards.clone(),
            users.clone(),
            settings.clone(),
            capture_sink(),
            &config,
        );
        (cards, users, settings, job)
    }

    fn commit(settings: &ProgramSettings, thresholds: ThresholdSettings) -> u64 {
        settings.thresholds().unwrap();
        settings
            .threshold_store()
            .append(Draft::new(thresholds))
            .unwrap()
            .version
    }

    fn seed(
        cards: &InMemoryCardRepository,
        users: &InMemoryUserDirectory,
        id: &str,
        points: u64,
        admin: bool,
    ) {
        users.upsert(UserRecord {
            user_id: id.into(),
            name: id.into(),
            email: None,
            mobile: None,
            is_admin: admin,
        });
        let mut card = LoyaltyCard::issue(id, format!("TAJI{id}"), 365, Utc::now());
        card.points = points;
        cards.insert(card).unwrap();
    }

    #[tokio::test]
    async fn test_run_walks_all_pages() {
        let (cards, users, _, job) = setup(2);
        for (i, points) in [0u64, 600, 1600, 3100, 100].iter().enumerate() {
            seed(&cards, &users, &format!("u{i}"), *points, false);
        }
        let report = job.run_all().await.unwrap();
        assert_eq!(report.snapshot_version, 1);
        assert_eq!(report.processed, 5);
        assert_eq!(report.updated, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.pages, 3);
        assert!(!report.superseded);
        assert_eq!(cards.find_by_user("u3").unwrap().unwrap().tier, Tier::Gold);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let (cards, users, _, job) = setup(10);
        seed(&cards, &users, "a", 1600, false);
        seed(&cards, &users, "boss", 0, true);
        let first = job.run_all().await.unwrap();
        assert_eq!(first.updated, 2);
        let second = job.run_all().await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.processed, 2);
    }

    #[tokio::test]
    async fn test_admin_normalized_to_platinum() {
        let (cards, users, _, job) = setup(10);
        seed(&cards, &users, "boss", 10, true);
        job.run_all().await.unwrap();
        let card = cards.find_by_user("boss").unwrap().unwrap();
        assert_eq!(card.tier, Tier::Platinum);
        assert_eq!(
            card.tier_acquisition_history[0].method,
            AcquisitionMethod::AdminGrant
        );
    }

    #[tokio::test]
    async fn test_malformed_card_counted_not_fatal() {
        let (cards, users, _, job) = setup(10);
        seed(&cards, &users, "a", 1600, false);
        let broken = LoyaltyCard::issue("b", " ", 365, Utc::now());
        cards.insert(broken).unwrap();
        seed(&cards, &users, "c", 600, false);

        let report = job.run_all().await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 2);
    }

    #[tokio::test]
    async fn test_scheduled_run_for_replaced_snapshot_is_skipped() {
        let (cards, users, settings, job) = setup(10);
        seed(&cards, &users, "a", 450, false);
        let early = commit(
            &settings,
            ThresholdSettings {
                early_access_enabled: true,
                ..ThresholdSettings::default()
            },
        );
        let standard = commit(&settings, ThresholdSettings::default());

        let stale = job.run_scheduled(early).await.unwrap();
        assert!(stale.superseded);
        assert_eq!(stale.snapshot_version, early);
        assert_eq!(stale.processed, 0);

        let current = job.run_scheduled(standard).await.unwrap();
        assert!(!current.superseded);
        assert_eq!(current.snapshot_version, standard);
        assert_eq!(current.processed, 1);
        assert_eq!(current.updated, 0);

        let card = cards.find_by_user("a").unwrap().unwrap();
        assert_eq!(card.tier, Tier::Basic);
        assert!(card.tier_acquisition_history.is_empty());
    }

    #[tokio::test]
    async fn test_manual_run_uses_latest_snapshot() {
        let (cards, users, settings, job) = setup(10);
        seed(&cards, &users, "a", 450, false);
        let version = commit(
            &settings,
            ThresholdSettings {
                early_access_enabled: true,
                ..ThresholdSettings::default()
            },
        );
        let report = job.run_all().await.unwrap();
        assert_eq!(report.snapshot_version, version);
        let card = cards.find_by_user("a").unwrap().unwrap();
        assert_eq!(card.tier, Tier::Bronze);
        assert_eq!(
            card.latest_acquisition(Tier::Bronze).unwrap().method,
            AcquisitionMethod::EarlyAccess
        );
    }

    #[tokio::test]
    async fn test_empty_repository() {
        let (_, _, _, job) = setup(10);
        let report = job.run_all().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.pages, 0);
    }
}
