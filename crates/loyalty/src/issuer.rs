//! Lazy card issuance. A user gets a card the first time they are awarded
//! points or look their card up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rewards_core::config::CardConfig;
use rewards_core::loyalty::LoyaltyCard;
use rewards_core::{LoyaltyError, LoyaltyResult};
use rewards_store::{CardInsert, CardRepository, UserRecord};
use tracing::{info, warn};

const MAX_NUMBER_ATTEMPTS: usize = 5;

pub struct CardIssuer {
    cards: Arc<dyn CardRepository>,
    prefix: String,
    validity_days: u32,
}

impl CardIssuer {
    pub fn new(cards: Arc<dyn CardRepository>, config: &CardConfig) -> Self {
        Self {
            cards,
            prefix: config.number_prefix.clone(),
            validity_days: config.validity_days,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix><last 8 digits of epoch millis><4 random digits>`.
    pub fn generate_number(&self, now: DateTime<Utc>) -> String {
        let millis = now.timestamp_millis().rem_euclid(100_000_000);
        let random: u16 = rand::thread_rng().gen_range(0..10_000);
        format!("{}{:08}{:04}", self.prefix, millis, random)
    }

    /// Existing card for `user`, or a newly issued one. Administrators'
    /// cards start at Platinum.
    pub fn ensure_card(&self, user: &UserRecord) -> LoyaltyResult<LoyaltyCard> {
        if let Some(card) = self.cards.find_by_user(&user.user_id)? {
            return Ok(card);
        }

        let now = Utc::now();
        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            let mut card = LoyaltyCard::issue(
                user.user_id.clone(),
                self.generate_number(now),
                self.validity_days,
                now,
            );
            if user.is_admin {
                card.normalize_admin(now);
            }

            match self.cards.insert(card)? {
                CardInsert::Created(card) => {
                    metrics::counter!("loyalty.cards_issued").increment(1);
                    info!(
                        user_id = %card.user_id,
                        card_number = %card.card_number,
                        tier = %card.tier,
                        "Loyalty card issued"
                    );
                    return Ok(card);
                }
                CardInsert::Existing(card) => return Ok(card),
                CardInsert::NumberTaken => {
                    warn!(user_id = %user.user_id, attempt, "Card number collision, regenerating");
                }
            }
        }

        Err(LoyaltyError::Persistence(format!(
            "could not allocate a unique card number for user {}",
            user.user_id
        )))
    }
}
