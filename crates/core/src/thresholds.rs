//! Threshold schedules and benefit milestones, plus the validation rules an
//! administrator's commit must pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, LoyaltyResult};
use crate::loyalty::Tier;

/// Four point thresholds, one per non-Basic tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierSchedule {
    pub bronze: u64,
    pub silver: u64,
    pub gold: u64,
    pub platinum: u64,
}

impl TierSchedule {
    pub fn threshold(&self, tier: Tier) -> Option<u64> {
        match tier {
            Tier::Basic => None,
            Tier::Bronze => Some(self.bronze),
            Tier::Silver => Some(self.silver),
            Tier::Gold => Some(self.gold),
            Tier::Platinum => Some(self.platinum),
        }
    }

    /// Highest tier whose threshold is met, Basic if none.
    pub fn highest_qualifying(&self, points: u64) -> Tier {
        Tier::RANKED
            .iter()
            .rev()
            .copied()
            .find(|t| self.threshold(*t).is_some_and(|min| points >= min))
            .unwrap_or(Tier::Basic)
    }

    fn values(&self) -> [u64; 4] {
        [self.bronze, self.silver, self.gold, self.platinum]
    }
}

/// Full threshold configuration as committed by an administrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdSettings {
    pub standard: TierSchedule,
    pub early_access_enabled: bool,
    /// Kept even while disabled so re-enabling restores the last values.
    pub early_access: TierSchedule,
}

impl ThresholdSettings {
    /// Standard thresholds must be strictly ascending. While early access is
    /// enabled, each early threshold must sit between the previous tier's
    /// standard threshold (0 for Bronze) and its own.
    pub fn validate(&self) -> LoyaltyResult<()> {
        let standard = self.standard.values();
        if standard.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LoyaltyError::Validation(
                "standard thresholds must be strictly ascending (Bronze < Silver < Gold < Platinum)"
                    .into(),
            ));
        }

        if self.early_access_enabled {
            let early = self.early_access.values();
            let mut floor = 0;
            for (idx, tier) in Tier::RANKED.iter().enumerate() {
                let ceiling = standard[idx];
                if early[idx] < floor || early[idx] > ceiling {
                    return Err(LoyaltyError::Validation(format!(
                        "early access {tier} threshold {} must be within [{floor}, {ceiling}]",
                        early[idx]
                    )));
                }
                floor = ceiling;
            }
        }
        Ok(())
    }
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            standard: TierSchedule {
                bronze: 500,
                silver: 1500,
                gold: 3000,
                platinum: 5000,
            },
            early_access_enabled: false,
            early_access: TierSchedule {
                bronze: 400,
                silver: 1200,
                gold: 2500,
                platinum: 3750,
            },
        }
    }
}

// ─── Benefit Milestones ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Milestone {
    pub points: u64,
    pub name: String,
}

/// Three named point milestones displayed alongside the tier ladder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BenefitMilestones {
    pub first: Milestone,
    pub second: Milestone,
    pub third: Milestone,
}

impl BenefitMilestones {
    pub fn validate(&self) -> LoyaltyResult<()> {
        let all = [&self.first, &self.second, &self.third];
        if all.iter().any(|m| m.name.trim().is_empty() || m.points == 0) {
            return Err(LoyaltyError::Validation(
                "all milestone values and names are required".into(),
            ));
        }
        if self.first.points >= self.second.points || self.second.points >= self.third.points {
            return Err(LoyaltyError::Validation(
                "milestones must be in ascending order (first < second < third)".into(),
            ));
        }
        Ok(())
    }
}

impl Default for BenefitMilestones {
    fn default() -> Self {
        Self {
            first: Milestone {
                points: 1000,
                name: "Welcome Reward".into(),
            },
            second: Milestone {
                points: 2500,
                name: "Loyalty Bonus".into(),
            },
            third: Milestone {
                points: 5000,
                name: "VIP Status".into(),
            },
        }
    }
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// Immutable, versioned configuration record. Versions increase by one per
/// commit; the highest version is current.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub version: u64,
    pub settings: T,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub notes: Option<String>,
}

pub type ThresholdSnapshot = Snapshot<ThresholdSettings>;
pub type MilestoneSnapshot = Snapshot<BenefitMilestones>;

/// Candidate configuration awaiting commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft<T> {
    pub settings: T,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl<T> Draft<T> {
    pub fn new(settings: T) -> Self {
        Self {
            settings,
            updated_by: None,
            notes: None,
        }
    }

    pub fn by(mut self, user: impl Into<String>) -> Self {
        self.updated_by = Some(user.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
