//! Points ledger: the foreground path that credits points to a card and
//! lets the resolver decide whether the tier moves.

use std::sync::Arc;

use chrono::Utc;
use rewards_core::event_bus::{make_event, EventPayload, EventSink, EventType};
use rewards_core::loyalty::{AcquisitionMethod, LoyaltyCard, TierChange};
use rewards_core::{LoyaltyError, LoyaltyResult};
use rewards_store::{CardRepository, UserDirectory, UserRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::issuer::CardIssuer;
use crate::resolver::{apply_decision, resolve_card, Reconcile};
use crate::settings::ProgramSettings;

/// Result of a points award.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardReceipt {
    pub card: LoyaltyCard,
    pub tier_change: Option<TierChange>,
}

pub struct PointsLedger {
    cards: Arc<dyn CardRepository>,
    users: Arc<dyn UserDirectory>,
    settings: Arc<ProgramSettings>,
    issuer: Arc<CardIssuer>,
    events: Arc<dyn EventSink>,
}

impl PointsLedger {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        users: Arc<dyn UserDirectory>,
        settings: Arc<ProgramSettings>,
        issuer: Arc<CardIssuer>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cards,
            users,
            settings,
            issuer,
            events,
        }
    }

    /// Credit `delta` points to the user's card, creating the card if needed.
    pub fn award(&self, user_id: &str, delta: i64, reason: &str) -> LoyaltyResult<AwardReceipt> {
        if delta <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "points award must be positive, got {delta}"
            )));
        }
        let amount = delta as u64;
        let user = self.require_user(user_id)?;
        let thresholds = self.settings.thresholds()?;
        self.issuer.ensure_card(&user)?;

        let now = Utc::now();
        let mut tier_change = None;
        let card = self.cards.update(user_id, &mut |card: &mut LoyaltyCard| {
            card.credit(amount, reason, now)?;
            tier_change = if user.is_admin {
                card.normalize_admin(now)
            } else {
                let decision = resolve_card(card, false, &thresholds.settings);
                if decision.preserved {
                    metrics::counter!("loyalty.tier_preserved").increment(1);
                }
                apply_decision(card, &decision, Reconcile::TierOnly, now)
            };
            Ok(())
        })?;

        metrics::counter!("loyalty.awards").increment(1);
        metrics::counter!("loyalty.points_awarded").increment(amount);
        debug!(
            user_id = %user_id,
            delta,
            balance = card.points,
            tier = %card.tier,
            config_version = thresholds.version,
            "Points awarded"
        );

        self.events.emit(make_event(
            EventType::PointsAwarded,
            EventPayload::Points {
                user_id: card.user_id.clone(),
                card_number: card.card_number.clone(),
                delta,
                balance: card.points,
                reason: reason.to_string(),
            },
        ));
        if let Some(change) = tier_change {
            self.announce_tier_change(&card, change);
        }

        Ok(AwardReceipt { card, tier_change })
    }

    /// Zero a card's balance and drop it to Basic. This is the only path that
    /// lowers a tier; administrator cards stay Platinum.
    pub fn reset_points(&self, user_id: &str, authorized_by: &str) -> LoyaltyResult<LoyaltyCard> {
        if authorized_by.trim().is_empty() {
            return Err(LoyaltyError::Validation(
                "points reset requires an authorizing administrator".into(),
            ));
        }
        let user = self.require_user(user_id)?;

        let now = Utc::now();
        let mut previous_balance = 0;
        let mut reset_delta = 0;
        let mut tier_change = None;
        let card = self.cards.update(user_id, &mut |card: &mut LoyaltyCard| {
            let from = card.tier;
            previous_balance = card.reset(format!("Admin reset by {authorized_by}"), now);
            reset_delta = card.points_history.last().map_or(0, |e| e.delta);
            tier_change = if user.is_admin {
                card.tier = from;
                card.normalize_admin(now)
            } else if from != card.tier {
                Some(TierChange {
                    from,
                    to: card.tier,
                    method: AcquisitionMethod::Standard,
                })
            } else {
                None
            };
            Ok(())
        })?;

        metrics::counter!("loyalty.points_resets").increment(1);
        info!(
            user_id = %user_id,
            authorized_by = %authorized_by,
            previous_balance,
            tier = %card.tier,
            "Points reset"
        );

        self.events.emit(make_event(
            EventType::PointsReset,
            EventPayload::Points {
                user_id: card.user_id.clone(),
                card_number: card.card_number.clone(),
                delta: reset_delta,
                balance: card.points,
                reason: format!("Admin reset by {authorized_by}"),
            },
        ));
        if let Some(change) = tier_change {
            self.announce_tier_change(&card, change);
        }
        Ok(card)
    }

    fn require_user(&self, user_id: &str) -> LoyaltyResult<UserRecord> {
        self.users
            .find(user_id)?
            .ok_or_else(|| LoyaltyError::UserNotFound(user_id.to_string()))
    }

    fn announce_tier_change(&self, card: &LoyaltyCard, change: TierChange) {
        if change.from == change.to {
            return;
        }
        if change.to > change.from {
            metrics::counter!("loyalty.tier_upgrades").increment(1);
        }
        info!(
            user_id = %card.user_id,
            old = %change.from,
            new = %change.to,
            method = ?change.method,
            "Tier changed"
        );
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
