//! Replay scripts: a list of users plus an ordered list of operations run
//! against one engine instance.

use chrono::{DateTime, Utc};
use rewards_core::thresholds::{BenefitMilestones, Draft, ThresholdSettings};
use rewards_core::LoyaltyResult;
use rewards_loyalty::{CardQuery, LoyaltyEngine};
use rewards_store::{InMemoryUserDirectory, UserRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    RegisterUser {
        user: UserRecord,
    },
    Award {
        user_id: String,
        points: i64,
        #[serde(default = "default_reason")]
        reason: String,
    },
    CommitThresholds {
        draft: Draft<ThresholdSettings>,
    },
    CommitMilestones {
        draft: Draft<BenefitMilestones>,
    },
    Reset {
        user_id: String,
        authorized_by: String,
    },
    Recalculate,
    GetCard {
        user_id: String,
    },
    /// Validate the card held by `user_id`, or an explicit `card_number`.
    Validate {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        card_number: Option<String>,
    },
    List {
        #[serde(default)]
        query: CardQuery,
    },
    Stats,
    Sweep {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
}

fn default_reason() -> String {
    "purchase".to_string()
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::RegisterUser { .. } => "register_user",
            Operation::Award { .. } => "award",
            Operation::CommitThresholds { .. } => "commit_thresholds",
            Operation::CommitMilestones { .. } => "commit_milestones",
            Operation::Reset { .. } => "reset",
            Operation::Recalculate => "recalculate",
            Operation::GetCard { .. } => "get_card",
            Operation::Validate { .. } => "validate",
            Operation::List { .. } => "list",
            Operation::Stats => "stats",
            Operation::Sweep { .. } => "sweep",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepOutcome {
    pub step: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs operations in order. A failing step is reported and the replay
/// moves on.
pub struct Replayer<'a> {
    engine: &'a LoyaltyEngine,
    users: &'a InMemoryUserDirectory,
}

impl<'a> Replayer<'a> {
    pub fn new(engine: &'a LoyaltyEngine, users: &'a InMemoryUserDirectory) -> Self {
        Self { engine, users }
    }

    pub async fn run(&self, operations: Vec<Operation>) -> anyhow::Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::with_capacity(operations.len());
        for (idx, operation) in operations.into_iter().enumerate() {
            let op = operation.name();
            let outcome = match self.apply(operation).await? {
                Ok(result) => StepOutcome {
                    step: idx + 1,
                    op,
                    ok: true,
                    result: Some(result),
                    error: None,
                },
                Err(e) => {
                    warn!(step = idx + 1, op, error = %e, "Replay step failed");
                    StepOutcome {
                        step: idx + 1,
                        op,
                        ok: false,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Outer error: the replay itself broke. Inner error: the operation was
    /// rejected by the engine.
    async fn apply(&self, operation: Operation) -> anyhow::Result<LoyaltyResult<Value>> {
        let engine = self.engine;
        let outcome = match operation {
            Operation::RegisterUser { user } => {
                let user_id = user.user_id.clone();
                self.users.upsert(user);
                Ok(json!({ "user_id": user_id }))
            }
            Operation::Award {
                user_id,
                points,
                reason,
            } => engine
                .award(&user_id, points, &reason)
                .map(|receipt| json!(receipt)),
            Operation::CommitThresholds { draft } => match engine.commit_thresholds(draft) {
                Ok(receipt) => {
                    let report = receipt.recalculation.await?;
                    report.map(|report| {
                        json!({
                            "snapshot": *receipt.snapshot,
                            "early_access_disabled": receipt.early_access_disabled,
                            "recalculation": report,
                        })
                    })
                }
                Err(e) => Err(e),
            },
            Operation::CommitMilestones { draft } => engine
                .commit_milestones(draft)
                .map(|snapshot| json!(*snapshot)),
            Operation::Reset {
                user_id,
                authorized_by,
            } => engine
                .reset_points(&user_id, &authorized_by)
                .map(|card| json!(card)),
            Operation::Recalculate => engine.recalculate().await.map(|report| json!(report)),
            Operation::GetCard { user_id } => engine.get_card(&user_id).map(|view| json!(view)),
            Operation::Validate {
                user_id,
                card_number,
            } => self.validate(user_id, card_number),
            Operation::List { query } => engine.list_cards(&query).map(|listing| json!(listing)),
            Operation::Stats => engine.stats().map(|stats| json!(stats)),
            Operation::Sweep { at } => engine
                .sweep_expired(at.unwrap_or_else(Utc::now))
                .map(|report| json!(report)),
        };
        Ok(outcome)
    }

    fn validate(
        &self,
        user_id: Option<String>,
        card_number: Option<String>,
    ) -> LoyaltyResult<Value> {
        let number = match (card_number, user_id) {
            (Some(number), _) => number,
            (None, Some(user_id)) => self.engine.get_card(&user_id)?.card.card_number,
            (None, None) => {
                return Err(rewards_core::LoyaltyError::Validation(
                    "validate needs a card_number or user_id".into(),
                ))
            }
        };
        self.engine
            .validate_card(&number)
            .map(|validation| json!(validation))
    }
}
