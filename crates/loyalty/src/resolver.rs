//! Tier resolution: the single source of truth for which tier a card holds.
//!
//! Both the award path and the recalculation job go through [`resolve`], so
//! the two can never disagree about thresholds, early access or the
//! no-downgrade guard.

use chrono::{DateTime, Utc};
use rewards_core::loyalty::{
    AcquisitionEntry, AcquisitionMethod, LoyaltyCard, Tier, TierChange, TierDecision,
};
use rewards_core::thresholds::ThresholdSettings;

/// Decide the tier for a card holder. Pure; callers persist the outcome.
///
/// Administrators are pinned to Platinum. Everyone else gets the higher of
/// the standard and (if enabled) early-access tiers, unless the tier they
/// already hold outranks it, in which case it is kept.
pub fn resolve(
    points: u64,
    is_admin: bool,
    current: Option<Tier>,
    history: &[AcquisitionEntry],
    settings: &ThresholdSettings,
) -> TierDecision {
    if is_admin {
        return TierDecision {
            tier: Tier::Platinum,
            method: AcquisitionMethod::AdminGrant,
            preserved: false,
        };
    }

    let standard_tier = settings.standard.highest_qualifying(points);
    let early_tier = if settings.early_access_enabled {
        settings.early_access.highest_qualifying(points)
    } else {
        Tier::Basic
    };

    let (candidate, method) = if early_tier > standard_tier {
        (early_tier, AcquisitionMethod::EarlyAccess)
    } else {
        (standard_tier, AcquisitionMethod::Standard)
    };

    match current {
        Some(held) if held > candidate => {
            let earned_early = history
                .iter()
                .any(|e| e.tier == held && e.method.is_early_access());
            let method = if earned_early && !settings.early_access_enabled {
                AcquisitionMethod::GrandfatheredEarlyAccess
            } else {
                AcquisitionMethod::Preserved
            };
            TierDecision {
                tier: held,
                method,
                preserved: true,
            }
        }
        _ => TierDecision {
            tier: candidate,
            method,
            preserved: false,
        },
    }
}

/// Resolve against a stored card, using its own tier and history as context.
pub fn resolve_card(
    card: &LoyaltyCard,
    is_admin: bool,
    settings: &ThresholdSettings,
) -> TierDecision {
    resolve(
        card.points,
        is_admin,
        Some(card.tier),
        &card.tier_acquisition_history,
        settings,
    )
}

/// What to record when a decision keeps the tier the card already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Only tier transitions are recorded.
    TierOnly,
    /// Also record a new entry when the method behind the current tier
    /// changed (e.g. early access → grandfathered_early_access).
    TierAndMethod,
}

/// Apply a non-admin decision to a card. Returns the recorded change, if any.
pub fn apply_decision(
    card: &mut LoyaltyCard,
    decision: &TierDecision,
    reconcile: Reconcile,
    now: DateTime<Utc>,
) -> Option<TierChange> {
    if decision.tier != card.tier {
        // Resolution never lowers a held tier; guard against stale callers.
        if decision.tier < card.tier {
            return None;
        }
        return Some(card.transition(decision.tier, decision.method, now));
    }

    if reconcile == Reconcile::TierOnly || card.tier == Tier::Basic {
        return None;
    }

    let recorded = card.latest_acquisition(card.tier).map(|e| e.method);
    if recorded == Some(decision.method) {
        return None;
    }
    card.record_acquisition(card.tier, decision.method, now);
    Some(TierChange {
        from: card.tier,
        to: card.tier,
        method: decision.method,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rewards_core::thresholds::TierSchedule;

    fn early_enabled() -> ThresholdSettings {
        ThresholdSettings {
            early_access_enabled: true,
            ..ThresholdSettings::default()
        }
    }

    fn entry(tier: Tier, method: AcquisitionMethod) -> AcquisitionEntry {
        AcquisitionEntry {
            tier,
            method,
            acquired_at: Utc::now(),
        }
    }

    #[test]
    fn test_zero_points_default_config_is_basic() {
        let d = resolve(0, false, None, &[], &ThresholdSettings::default());
        assert_eq!(d.tier, Tier::Basic);
        assert_eq!(d.method, AcquisitionMethod::Standard);
        assert!(!d.preserved);
    }

    #[test]
    fn test_standard_bronze() {
        let d = resolve(550, false, None, &[], &ThresholdSettings::default());
        assert_eq!(d.tier, Tier::Bronze);
        assert_eq!(d.method, AcquisitionMethod::Standard);
    }

    #[test]
    fn test_early_access_bronze() {
        let d = resolve(450, false, None, &[], &early_enabled());
        assert_eq!(d.tier, Tier::Bronze);
        assert_eq!(d.method, AcquisitionMethod::EarlyAccess);
    }

    #[test]
    fn test_early_thresholds_ignored_when_disabled() {
        let d = resolve(450, false, None, &[], &ThresholdSettings::default());
        assert_eq!(d.tier, Tier::Basic);
    }

    #[test]
    fn test_tie_between_schedules_is_standard() {
        // Early Bronze equal to standard Bronze: both give Bronze.
        let mut settings = early_enabled();
        settings.early_access.bronze = 500;
        let d = resolve(500, false, None, &[], &settings);
        assert_eq!(d.tier, Tier::Bronze);
        assert_eq!(d.method, AcquisitionMethod::Standard);
    }

    #[test]
    fn test_admin_pinned_to_platinum() {
        let d = resolve(0, true, Some(Tier::Basic), &[], &ThresholdSettings::default());
        assert_eq!(d.tier, Tier::Platinum);
        assert_eq!(d.method, AcquisitionMethod::AdminGrant);
    }

    #[test]
    fn test_grandfathered_after_early_access_disabled() {
        let history = vec![entry(Tier::Gold, AcquisitionMethod::EarlyAccess)];
        let d = resolve(
            2600,
            false,
            Some(Tier::Gold),
            &history,
            &ThresholdSettings::default(),
        );
        assert_eq!(d.tier, Tier::Gold);
        assert_eq!(d.method, AcquisitionMethod::GrandfatheredEarlyAccess);
        assert!(d.preserved);
    }

    #[test]
    fn test_legacy_early_access_also_grandfathered() {
        let history = vec![entry(Tier::Silver, AcquisitionMethod::EarlyAccessLegacy)];
        let d = resolve(
            1300,
            false,
            Some(Tier::Silver),
            &history,
            &ThresholdSettings::default(),
        );
        assert_eq!(d.method, AcquisitionMethod::GrandfatheredEarlyAccess);
    }

    #[test]
    fn test_raised_thresholds_preserve_tier() {
        let mut settings = ThresholdSettings::default();
        settings.standard = TierSchedule {
            bronze: 800,
            silver: 2000,
            gold: 4000,
            platinum: 6000,
        };
        let history = vec![entry(Tier::Silver, AcquisitionMethod::Standard)];
        let d = resolve(1600, false, Some(Tier::Silver), &history, &settings);
        assert_eq!(d.tier, Tier::Silver);
        assert_eq!(d.method, AcquisitionMethod::Preserved);
        assert!(d.preserved);
    }

    #[test]
    fn test_early_tier_of_other_rank_is_not_grandfathered() {
        // Bronze came from early access, Silver from standard; Silver is held.
        let history = vec![
            entry(Tier::Bronze, AcquisitionMethod::EarlyAccess),
            entry(Tier::Silver, AcquisitionMethod::Standard),
        ];
        let mut settings = ThresholdSettings::default();
        settings.standard.silver = 2000;
        let d = resolve(1600, false, Some(Tier::Silver), &history, &settings);
        assert_eq!(d.method, AcquisitionMethod::Preserved);
    }

    #[test]
    fn test_apply_decision_records_upgrade() {
        let mut card = LoyaltyCard::issue("u1", "TAJI1", 365, Utc::now());
        card.points = 1600;
        let d = resolve_card(&card, false, &ThresholdSettings::default());
        let change = apply_decision(&mut card, &d, Reconcile::TierOnly, Utc::now()).unwrap();
        assert_eq!(change.from, Tier::Basic);
        assert_eq!(change.to, Tier::Silver);
        assert_eq!(card.tier, Tier::Silver);
        assert_eq!(card.tier_acquisition_history.len(), 1);
    }

    #[test]
    fn test_apply_decision_basic_writes_nothing() {
        let mut card = LoyaltyCard::issue("u1", "TAJI1", 365, Utc::now());
        let d = resolve_card(&card, false, &ThresholdSettings::default());
        assert!(apply_decision(&mut card, &d, Reconcile::TierAndMethod, Utc::now()).is_none());
        assert!(card.tier_acquisition_history.is_empty());
    }

    #[test]
    fn test_apply_decision_method_reconciliation_is_idempotent() {
        let mut card = LoyaltyCard::issue("u1", "TAJI1", 365, Utc::now());
        card.points = 2600;
        card.transition(Tier::Gold, AcquisitionMethod::EarlyAccess, Utc::now());

        let settings = ThresholdSettings::default();
        let d = resolve_card(&card, false, &settings);
        assert!(apply_decision(&mut card, &d, Reconcile::TierOnly, Utc::now()).is_none());

        let change = apply_decision(&mut card, &d, Reconcile::TierAndMethod, Utc::now()).unwrap();
        assert_eq!(change.method, AcquisitionMethod::GrandfatheredEarlyAccess);
        assert_eq!(card.tier_acquisition_history.len(), 2);

        let again = resolve_card(&card, false, &settings);
        assert!(apply_decision(&mut card, &again, Reconcile::TierAndMethod, Utc::now()).is_none());
        assert_eq!(card.tier_acquisition_history.len(), 2);
    }

    fn arb_tier() -> impl Strategy<Value = Tier> {
        prop::sample::select(Tier::ALL.to_vec())
    }

    fn arb_settings() -> impl Strategy<Value = ThresholdSettings> {
        (
            1u64..2_000,
            1u64..2_000,
            1u64..2_000,
            1u64..2_000,
            any::<bool>(),
            prop::array::uniform4(0u64..=100),
        )
            .prop_map(|(a, b, c, d, enabled, pct)| {
                let bronze = a;
                let silver = bronze + b;
                let gold = silver + c;
                let platinum = gold + d;
                let standard = [bronze, silver, gold, platinum];
                let mut early = [0u64; 4];
                let mut floor = 0;
                for i in 0..4 {
                    early[i] = floor + (standard[i] - floor) * pct[i] / 100;
                    floor = standard[i];
                }
                ThresholdSettings {
                    standard: TierSchedule {
                        bronze,
                        silver,
                        gold,
                        platinum,
                    },
                    early_access_enabled: enabled,
                    early_access: TierSchedule {
                        bronze: early[0],
                        silver: early[1],
                        gold: early[2],
                        platinum: early[3],
                    },
                }
            })
    }

    proptest! {
        #[test]
        fn prop_generated_settings_are_valid(settings in arb_settings()) {
            prop_assert!(settings.validate().is_ok());
        }

        #[test]
        fn prop_never_below_held_tier(
            points in 0u64..10_000,
            held in arb_tier(),
            settings in arb_settings(),
        ) {
            let d = resolve(points, false, Some(held), &[], &settings);
            prop_assert!(d.tier >= held);
        }

        #[test]
        fn prop_admin_always_platinum(
            points in any::<u64>(),
            held in proptest::option::of(arb_tier()),
            settings in arb_settings(),
        ) {
            let d = resolve(points, true, held, &[], &settings);
            prop_assert_eq!(d.tier, Tier::Platinum);
            prop_assert_eq!(d.method, AcquisitionMethod::AdminGrant);
        }

        #[test]
        fn prop_resolution_is_deterministic(
            points in 0u64..10_000,
            held in proptest::option::of(arb_tier()),
            settings in arb_settings(),
        ) {
            let first = resolve(points, false, held, &[], &settings);
            let second = resolve(points, false, held, &[], &settings);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_reconfiguration_sequence_is_monotone(
            points in 0u64..10_000,
            configs in prop::collection::vec(arb_settings(), 1..6),
        ) {
            let mut card = LoyaltyCard::issue("u1", "TAJI1", 365, Utc::now());
            card.points = points;
            let mut floor = Tier::Basic;
            for settings in &configs {
                let d = resolve_card(&card, false, settings);
                apply_decision(&mut card, &d, Reconcile::TierAndMethod, Utc::now());
                prop_assert!(card.tier >= floor);
                floor = card.tier;
            }
        }
    }
}
