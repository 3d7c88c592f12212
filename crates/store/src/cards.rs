//! Card repository: one loyalty card per user, keyed by user id with a
//! secondary card-number index.
//!
//! The in-memory backend keeps cards in a `BTreeMap` so the recalculation
//! cursor can walk them in a stable order one page at a time.
//! Production: replace with a database table ordered on the same key.

use std::collections::BTreeMap;
use std::ops::Bound;

use dashmap::DashMap;
use parking_lot::RwLock;
use rewards_core::loyalty::{LoyaltyCard, Tier, UserId};
use rewards_core::{LoyaltyError, LoyaltyResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of inserting a freshly issued card.
#[derive(Debug, Clone)]
pub enum CardInsert {
    Created(LoyaltyCard),
    /// The user already had a card; it is returned unchanged.
    Existing(LoyaltyCard),
    /// Another user's card already uses this number.
    NumberTaken,
}

/// Admin listing filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardFilter {
    All,
    CardNumber(String),
    Users(Vec<UserId>),
    Tiers(Vec<Tier>),
}

impl CardFilter {
    pub fn matches(&self, card: &LoyaltyCard) -> bool {
        match self {
            CardFilter::All => true,
            CardFilter::CardNumber(number) => &card.card_number == number,
            CardFilter::Users(ids) => ids.iter().any(|id| id == &card.user_id),
            CardFilter::Tiers(tiers) => tiers.contains(&card.tier),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CardSearchPage {
    pub cards: Vec<LoyaltyCard>,
    pub total: u64,
}

/// Durable card storage.
///
/// `update` is the only mutation path for existing cards: the closure runs
/// against a working copy and the result is stored only if it returns `Ok`.
pub trait CardRepository: Send + Sync {
    fn find_by_user(&self, user_id: &str) -> LoyaltyResult<Option<LoyaltyCard>>;

    fn find_by_number(&self, card_number: &str) -> LoyaltyResult<Option<LoyaltyCard>>;

    fn insert(&self, card: LoyaltyCard) -> LoyaltyResult<CardInsert>;

    fn update(
        &self,
        user_id: &str,
        apply: &mut dyn FnMut(&mut LoyaltyCard) -> LoyaltyResult<()>,
    ) -> LoyaltyResult<LoyaltyCard>;

    /// Up to `limit` cards ordered by user id, strictly after `cursor`.
    fn page_after(&self, cursor: Option<&str>, limit: usize) -> LoyaltyResult<Vec<LoyaltyCard>>;

    /// Filtered cards, newest first, with the total match count.
    fn search(
        &self,
        filter: &CardFilter,
        offset: usize,
        limit: usize,
    ) -> LoyaltyResult<CardSearchPage>;

    fn count(&self) -> LoyaltyResult<u64>;
}

/// Thread-safe in-memory card repository.
#[derive(Default)]
pub struct InMemoryCardRepository {
    cards: RwLock<BTreeMap<UserId, LoyaltyCard>>,
    numbers: DashMap<String, UserId>,
}

impl InMemoryCardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }
}

impl CardRepository for InMemoryCardRepository {
    fn find_by_user(&self, user_id: &str) -> LoyaltyResult<Option<LoyaltyCard>> {
        Ok(self.cards.read().get(user_id).cloned())
    }

    fn find_by_number(&self, card_number: &str) -> LoyaltyResult<Option<LoyaltyCard>> {
        let Some(user_id) = self.numbers.get(card_number).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        self.find_by_user(&user_id)
    }

    fn insert(&self, card: LoyaltyCard) -> LoyaltyResult<CardInsert> {
        let mut cards = self.cards.write();
        if let Some(existing) = cards.get(&card.user_id) {
            return Ok(CardInsert::Existing(existing.clone()));
        }
        if self.numbers.contains_key(&card.card_number) {
            return Ok(CardInsert::NumberTaken);
        }
        self.numbers
            .insert(card.card_number.clone(), card.user_id.clone());
        cards.insert(card.user_id.clone(), card.clone());
        debug!(user_id = %card.user_id, card_number = %card.card_number, "Card stored");
        Ok(CardInsert::Created(card))
    }

    fn update(
        &self,
        user_id: &str,
        apply: &mut dyn FnMut(&mut LoyaltyCard) -> LoyaltyResult<()>,
    ) -> LoyaltyResult<LoyaltyCard> {
        let mut cards = self.cards.write();
        let stored = cards
            .get_mut(user_id)
            .ok_or_else(|| LoyaltyError::CardNotFound(user_id.to_string()))?;

        let mut working = stored.clone();
        apply(&mut working)?;
        if working.card_number != stored.card_number || working.user_id != stored.user_id {
            return Err(LoyaltyError::Validation(format!(
                "card identity of user {user_id} is immutable"
            )));
        }
        *stored = working;
        Ok(stored.clone())
    }

    fn page_after(&self, cursor: Option<&str>, limit: usize) -> LoyaltyResult<Vec<LoyaltyCard>> {
        let cards = self.cards.read();
        let lower = match cursor {
            Some(c) => Bound::Excluded(c),
            None => Bound::Unbounded,
        };
        Ok(cards
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, card)| card.clone())
            .collect())
    }

    fn search(
        &self,
        filter: &CardFilter,
        offset: usize,
        limit: usize,
    ) -> LoyaltyResult<CardSearchPage> {
        let cards = self.cards.read();
        let mut matched: Vec<&LoyaltyCard> = cards.values().filter(|c| filter.matches(c)).collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.card_number.cmp(&b.card_number))
        });
        Ok(CardSearchPage {
            total: matched.len() as u64,
            cards: matched
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        })
    }

    fn count(&self) -> LoyaltyResult<u64> {
        Ok(self.cards.read().len() as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn card(user: &str, number: &str, day: u32) -> LoyaltyCard {
        let at = Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap();
        LoyaltyCard::issue(user, number, 365, at)
    }

    fn seeded() -> InMemoryCardRepository {
        let repo = InMemoryCardRepository::new();
        for (i, user) in ["u1", "u2", "u3", "u4", "u5"].iter().enumerate() {
            let created = repo
                .insert(card(user, &format!("TAJI{i}"), i as u32 + 1))
                .unwrap();
            assert!(matches!(created, CardInsert::Created(_)));
        }
        repo
    }

    #[test]
    fn test_insert_returns_existing_card() {
        let repo = seeded();
        let again = repo.insert(card("u1", "TAJI99", 1)).unwrap();
        match again {
            CardInsert::Existing(existing) => assert_eq!(existing.card_number, "TAJI0"),
            other => panic!("expected existing card, got {other:?}"),
        }
        assert!(repo.find_by_number("TAJI99").unwrap().is_none());
    }

    #[test]
    fn test_insert_detects_number_collision() {
        let repo = seeded();
        let collided = repo.insert(card("u9", "TAJI2", 1)).unwrap();
        assert!(matches!(collided, CardInsert::NumberTaken));
        assert!(repo.find_by_user("u9").unwrap().is_none());
    }

    #[test]
    fn test_find_by_number() {
        let repo = seeded();
        let found = repo.find_by_number("TAJI3").unwrap().unwrap();
        assert_eq!(found.user_id, "u4");
        assert!(repo.find_by_number("NOPE").unwrap().is_none());
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let repo = seeded();
        let result = repo.update("u1", &mut |c| {
            c.points = 999;
            Err(LoyaltyError::Validation("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(repo.find_by_user("u1").unwrap().unwrap().points, 0);

        let updated = repo
            .update("u1", &mut |c| {
                c.points = 42;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.points, 42);
        assert_eq!(repo.find_by_user("u1").unwrap().unwrap().points, 42);
    }

    #[test]
    fn test_update_unknown_user() {
        let repo = seeded();
        let err = repo.update("ghost", &mut |_| Ok(())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_cannot_change_card_number() {
        let repo = seeded();
        let err = repo
            .update("u2", &mut |c| {
                c.card_number = "HIJACK".into();
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(repo.find_by_user("u2").unwrap().unwrap().card_number, "TAJI1");
    }

    #[test]
    fn test_page_after_walks_everything_once() {
        let repo = seeded();
        let mut cursor: Option<String> = None;
        let mut seen = Vec::new();
        loop {
            let page = repo.page_after(cursor.as_deref(), 2).unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 2);
            cursor = page.last().map(|c| c.user_id.clone());
            seen.extend(page.into_iter().map(|c| c.user_id));
        }
        assert_eq!(seen, vec!["u1", "u2", "u3", "u4", "u5"]);
    }

    #[test]
    fn test_search_newest_first_with_offset() {
        let repo = seeded();
        let page = repo.search(&CardFilter::All, 1, 2).unwrap();
        assert_eq!(page.total, 5);
        let users: Vec<_> = page.cards.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(users, vec!["u4", "u3"]);
    }

    #[test]
    fn test_search_by_tier_and_users() {
        let repo = seeded();
        repo.update("u3", &mut |c| {
            c.tier = Tier::Gold;
            Ok(())
        })
        .unwrap();

        let gold = repo
            .search(&CardFilter::Tiers(vec![Tier::Gold]), 0, 10)
            .unwrap();
        assert_eq!(gold.total, 1);
        assert_eq!(gold.cards[0].user_id, "u3");

        let users = repo
            .search(&CardFilter::Users(vec!["u1".into(), "u5".into()]), 0, 10)
            .unwrap();
        assert_eq!(users.total, 2);

        let by_number = repo
            .search(&CardFilter::CardNumber("TAJI4".into()), 0, 10)
            .unwrap();
        assert_eq!(by_number.cards[0].user_id, "u5");
    }
}
