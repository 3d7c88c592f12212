//! Loyalty card domain types: tiers, acquisition methods, cards and their
//! append-only histories.
//!
//! Five-tier ladder: Basic → Bronze → Silver → Gold → Platinum.
//! Platinum is reserved for administrators; every other tier is earned
//! through points against the active threshold schedule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LoyaltyError, LoyaltyResult};

/// Stable identifier of a user in the identity system.
pub type UserId = String;

/// Largest balance a card may hold; every balance fits a signed history delta.
pub const MAX_BALANCE: u64 = i64::MAX as u64;

// ─── Tier System ────────────────────────────────────────────────────────────

/// Loyalty tier levels, ordered by rank.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Implicit default. Never recorded as "acquired".
    #[default]
    Basic,
    Bronze,
    Silver,
    Gold,
    /// Administrators only.
    Platinum,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Basic,
        Tier::Bronze,
        Tier::Silver,
        Tier::Gold,
        Tier::Platinum,
    ];

    /// Tiers that carry a point threshold, lowest first.
    pub const RANKED: [Tier; 4] = [Tier::Bronze, Tier::Silver, Tier::Gold, Tier::Platinum];

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Discount shown to presentation layers. The engine never applies it.
    pub fn discount_percentage(&self) -> u8 {
        match self {
            Tier::Basic => 0,
            Tier::Bronze => 2,
            Tier::Silver => 3,
            Tier::Gold => 5,
            Tier::Platinum => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "Basic",
            Tier::Bronze => "Bronze",
            Tier::Silver => "Silver",
            Tier::Gold => "Gold",
            Tier::Platinum => "Platinum",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LoyaltyError::Validation(format!("unknown tier: {s}")))
    }
}

/// How a tier was granted. Recorded on every acquisition entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMethod {
    Standard,
    EarlyAccess,
    /// Early-access grants imported from the previous program.
    EarlyAccessLegacy,
    AdminGrant,
    Preserved,
    GrandfatheredEarlyAccess,
}

impl AcquisitionMethod {
    pub fn is_early_access(&self) -> bool {
        matches!(
            self,
            AcquisitionMethod::EarlyAccess | AcquisitionMethod::EarlyAccessLegacy
        )
    }
}

/// Output of tier resolution. Not persisted directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierDecision {
    pub tier: Tier,
    pub method: AcquisitionMethod,
    /// The current tier was kept because it outranks what points alone earn.
    pub preserved: bool,
}

// ─── History ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointsEntry {
    /// Negative only for explicit resets.
    pub delta: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquisitionEntry {
    pub tier: Tier,
    pub method: AcquisitionMethod,
    pub acquired_at: DateTime<Utc>,
}

/// A tier transition applied to a card, reported back to callers for
/// notification purposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierChange {
    pub from: Tier,
    pub to: Tier,
    pub method: AcquisitionMethod,
}

// ─── Loyalty Card ───────────────────────────────────────────────────────────

/// One card per user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoyaltyCard {
    pub user_id: UserId,
    pub card_number: String,
    pub points: u64,
    pub tier: Tier,
    pub points_history: Vec<PointsEntry>,
    pub tier_acquisition_history: Vec<AcquisitionEntry>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LoyaltyCard {
    /// Fresh Basic card with no history.
    pub fn issue(
        user_id: impl Into<UserId>,
        card_number: impl Into<String>,
        validity_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            card_number: card_number.into(),
            points: 0,
            tier: Tier::Basic,
            points_history: Vec::new(),
            tier_acquisition_history: Vec::new(),
            is_active: true,
            created_at: now,
            expires_at: now + Duration::days(i64::from(validity_days)),
        }
    }

    /// Record a positive award. Overflow is a validation failure.
    pub fn credit(
        &mut self,
        delta: u64,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<()> {
        let signed = i64::try_from(delta)
            .map_err(|_| LoyaltyError::Validation(format!("award too large: {delta}")))?;
        let points = self
            .points
            .checked_add(delta)
            .filter(|p| *p <= MAX_BALANCE)
            .ok_or_else(|| LoyaltyError::Validation("points balance overflow".into()))?;
        self.points = points;
        self.points_history.push(PointsEntry {
            delta: signed,
            reason: reason.into(),
            timestamp: now,
        });
        Ok(())
    }

    /// Zero the balance and drop to Basic. Returns the previous balance.
    pub fn reset(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> u64 {
        let previous = self.points;
        self.points_history.push(PointsEntry {
            delta: -i64::try_from(previous).unwrap_or(i64::MAX),
            reason: reason.into(),
            timestamp: now,
        });
        self.points = 0;
        self.tier = Tier::Basic;
        previous
    }

    /// Move to `tier`, recording how. Basic is never recorded.
    pub fn transition(
        &mut self,
        tier: Tier,
        method: AcquisitionMethod,
        now: DateTime<Utc>,
    ) -> TierChange {
        let change = TierChange {
            from: self.tier,
            to: tier,
            method,
        };
        self.tier = tier;
        if tier != Tier::Basic {
            self.record_acquisition(tier, method, now);
        }
        change
    }

    pub fn record_acquisition(
        &mut self,
        tier: Tier,
        method: AcquisitionMethod,
        now: DateTime<Utc>,
    ) {
        self.tier_acquisition_history.push(AcquisitionEntry {
            tier,
            method,
            acquired_at: now,
        });
    }

    /// Pin an administrator's card to Platinum. Adds an `admin_grant` entry
    /// only if one is not already present. `None` when already normalized.
    pub fn normalize_admin(&mut self, now: DateTime<Utc>) -> Option<TierChange> {
        let has_grant = self
            .tier_acquisition_history
            .iter()
            .any(|e| e.tier == Tier::Platinum && e.method == AcquisitionMethod::AdminGrant);
        if self.tier == Tier::Platinum && has_grant {
            return None;
        }
        let change = TierChange {
            from: self.tier,
            to: Tier::Platinum,
            method: AcquisitionMethod::AdminGrant,
        };
        self.tier = Tier::Platinum;
        if !has_grant {
            self.record_acquisition(Tier::Platinum, AcquisitionMethod::AdminGrant, now);
        }
        Some(change)
    }

    /// Most recent acquisition entry for a given tier.
    pub fn latest_acquisition(&self, tier: Tier) -> Option<&AcquisitionEntry> {
        self.tier_acquisition_history
            .iter()
            .filter(|e| e.tier == tier)
            .max_by_key(|e| e.acquired_at)
    }

    pub fn acquired_via_early_access(&self) -> bool {
        self.tier_acquisition_history
            .iter()
            .any(|e| e.method.is_early_access())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        let secs = (self.expires_at - now).num_seconds();
        // Ceiling division, matching "expires in N days" wording.
        secs.div_euclid(86_400) + i64::from(secs.rem_euclid(86_400) != 0)
    }

    /// e.g. "March 5, 2027".
    pub fn formatted_expiry(&self) -> String {
        format_long_date(self.expires_at)
    }

    /// Structural checks run before a card is recalculated.
    pub fn verify(&self) -> LoyaltyResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(LoyaltyError::Validation(format!(
                "card {} has no owner",
                self.card_number
            )));
        }
        if self.card_number.trim().is_empty() {
            return Err(LoyaltyError::Validation(format!(
                "card for user {} has no number",
                self.user_id
            )));
        }
        Ok(())
    }
}

pub fn format_long_date(at: DateTime<Utc>) -> String {
    at.format("%B %-d, %Y").to_string()
}
