//! Read-side card operations: member card lookup, point-of-sale validation,
//! admin listing and program statistics, plus the expiry sweep.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rewards_core::event_bus::{make_event, EventPayload, EventSink, EventType};
use rewards_core::loyalty::{LoyaltyCard, Tier};
use rewards_core::{LoyaltyError, LoyaltyResult};
use rewards_store::{CardFilter, CardRepository, UserDirectory, UserRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::issuer::CardIssuer;
use crate::settings::ProgramSettings;

const NEW_MEMBER_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HolderSummary {
    pub name: String,
    pub email: Option<String>,
    pub mobile: Option<String>,
}

impl HolderSummary {
    fn from_record(user: Option<&UserRecord>) -> Self {
        match user {
            Some(u) => Self {
                name: u.name.clone(),
                email: u.email.clone(),
                mobile: u.mobile.clone(),
            },
            None => Self {
                name: "Unknown User".into(),
                email: None,
                mobile: None,
            },
        }
    }
}

/// A member's own card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardView {
    #[serde(flatten)]
    pub card: LoyaltyCard,
    pub formatted_expiry: String,
    pub expiry_message: String,
    pub discount_percentage: u8,
    pub early_access_enabled: bool,
}

/// Outcome of a point-of-sale card check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardValidation {
    pub card_number: String,
    pub tier: Tier,
    pub points: u64,
    pub discount_percentage: u8,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub formatted_expiry: String,
    pub expiry_message: String,
    pub holder: HolderSummary,
    pub early_access_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardQuery {
    /// 1-based; 0 is treated as 1.
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRow {
    #[serde(flatten)]
    pub card: LoyaltyCard,
    pub holder: HolderSummary,
    pub formatted_expiry: String,
    pub days_until_expiry: i64,
    /// Non-admin card that holds an early-access grant while early access
    /// is switched off.
    pub affected_by_early_access_disable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub total: u64,
    pub pages: u64,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardListing {
    pub cards: Vec<CardRow>,
    pub pagination: Pagination,
    pub early_access_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoyaltyStats {
    pub total_members: u64,
    pub active_cards: u64,
    pub total_points: u64,
    pub avg_points_per_member: u64,
    pub new_members_last_30_days: u64,
    pub growth_percentage: u64,
    pub tier_distribution: BTreeMap<Tier, u64>,
    pub early_access_enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: u64,
    pub deactivated: u64,
}

pub struct CardService {
    cards: Arc<dyn CardRepository>,
    users: Arc<dyn UserDirectory>,
    settings: Arc<ProgramSettings>,
    issuer: Arc<CardIssuer>,
    events: Arc<dyn EventSink>,
    default_limit: usize,
    scan_page_size: usize,
}

impl CardService {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        users: Arc<dyn UserDirectory>,
        settings: Arc<ProgramSettings>,
        issuer: Arc<CardIssuer>,
        events: Arc<dyn EventSink>,
        default_limit: usize,
        scan_page_size: usize,
    ) -> Self {
        Self {
            cards,
            users,
            settings,
            issuer,
            events,
            default_limit: default_limit.max(1),
            scan_page_size: scan_page_size.max(1),
        }
    }

    /// The user's card, issued on first lookup.
    pub fn get_card(&self, user_id: &str) -> LoyaltyResult<CardView> {
        let user = self
            .users
            .find(user_id)?
            .ok_or_else(|| LoyaltyError::UserNotFound(user_id.to_string()))?;
        let thresholds = self.settings.thresholds()?;
        let mut card = self.issuer.ensure_card(&user)?;

        if user.is_admin && card.tier != Tier::Platinum {
            let now = Utc::now();
            card = self.cards.update(user_id, &mut |c: &mut LoyaltyCard| {
                c.normalize_admin(now);
                Ok(())
            })?;
        }

        let formatted_expiry = card.formatted_expiry();
        Ok(CardView {
            expiry_message: expiry_message(&formatted_expiry),
            formatted_expiry,
            discount_percentage: card.tier.discount_percentage(),
            early_access_enabled: thresholds.settings.early_access_enabled,
            card,
        })
    }

    pub fn validate_card(&self, card_number: &str) -> LoyaltyResult<CardValidation> {
        let card = self
            .cards
            .find_by_number(card_number.trim())?
            .ok_or_else(|| LoyaltyError::CardNotFound(card_number.to_string()))?;
        if !card.is_active {
            return Err(LoyaltyError::CardInactive(card.card_number));
        }
        if card.is_expired(Utc::now()) {
            return Err(LoyaltyError::CardExpired(card.card_number));
        }

        let holder = self.users.find(&card.user_id)?;
        let thresholds = self.settings.thresholds()?;
        let formatted_expiry = card.formatted_expiry();
        debug!(card_number = %card.card_number, tier = %card.tier, "Card validated");

        Ok(CardValidation {
            discount_percentage: card.tier.discount_percentage(),
            issued_at: card.created_at,
            expires_at: card.expires_at,
            expiry_message: expiry_message(&formatted_expiry),
            formatted_expiry,
            holder: HolderSummary::from_record(holder.as_ref()),
            early_access_enabled: thresholds.settings.early_access_enabled,
            card_number: card.card_number,
            tier: card.tier,
            points: card.points,
        })
    }

    /// Admin listing, newest cards first.
    pub fn list_cards(&self, query: &CardQuery) -> LoyaltyResult<CardListing> {
        let page = query.page.max(1);
        let limit = query.limit.unwrap_or(self.default_limit).max(1);
        let filter = self.listing_filter(query.search.as_deref())?;
        let early_access_enabled = self.settings.thresholds()?.settings.early_access_enabled;

        let found = self.cards.search(&filter, (page - 1) * limit, limit)?;
        let now = Utc::now();
        let mut rows = Vec::with_capacity(found.cards.len());
        for card in found.cards {
            let user = self.users.find(&card.user_id)?;
            let is_admin = user.as_ref().is_some_and(|u| u.is_admin);
            rows.push(CardRow {
                holder: HolderSummary::from_record(user.as_ref()),
                formatted_expiry: card.formatted_expiry(),
                days_until_expiry: card.days_until_expiry(now),
                affected_by_early_access_disable: !early_access_enabled
                    && !is_admin
                    && card.acquired_via_early_access(),
                card,
            });
        }

        Ok(CardListing {
            cards: rows,
            pagination: Pagination {
                total: found.total,
                pages: found.total.div_ceil(limit as u64),
                page,
                limit,
            },
            early_access_enabled,
        })
    }

    /// Card number when the term carries the card prefix, else holder
    /// details, else tier name.
    fn listing_filter(&self, search: Option<&str>) -> LoyaltyResult<CardFilter> {
        let term = search.map(str::trim).unwrap_or_default();
        if term.is_empty() {
            return Ok(CardFilter::All);
        }
        if term.starts_with(self.issuer.prefix()) {
            return Ok(CardFilter::CardNumber(term.to_string()));
        }
        let users = self.users.search(term)?;
        if !users.is_empty() {
            return Ok(CardFilter::Users(users));
        }
        let needle = term.to_lowercase();
        Ok(CardFilter::Tiers(
            Tier::ALL
                .iter()
                .copied()
                .filter(|t| t.as_str().to_lowercase().contains(&needle))
                .collect(),
        ))
    }

    pub fn stats(&self) -> LoyaltyResult<LoyaltyStats> {
        let since = Utc::now() - Duration::days(NEW_MEMBER_WINDOW_DAYS);
        let mut stats = LoyaltyStats {
            total_members: 0,
            active_cards: 0,
            total_points: 0,
            avg_points_per_member: 0,
            new_members_last_30_days: 0,
            growth_percentage: 0,
            tier_distribution: Tier::ALL.iter().map(|t| (*t, 0)).collect(),
            early_access_enabled: self.settings.thresholds()?.settings.early_access_enabled,
        };

        self.scan(|card| {
            stats.total_members += 1;
            stats.active_cards += u64::from(card.is_active);
            stats.total_points = stats.total_points.saturating_add(card.points);
            stats.new_members_last_30_days += u64::from(card.created_at >= since);
            *stats.tier_distribution.entry(card.tier).or_insert(0) += 1;
            Ok(())
        })?;

        if stats.total_members > 0 {
            stats.avg_points_per_member = stats.total_points / stats.total_members;
            stats.growth_percentage = stats.new_members_last_30_days * 100 / stats.total_members;
        }
        Ok(stats)
    }

    /// Deactivate every active card whose expiry is before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> LoyaltyResult<SweepReport> {
        let mut report = SweepReport::default();
        self.scan(|card| {
            report.scanned += 1;
            if card.is_active && card.is_expired(now) && self.deactivate(&card.user_id, now)? {
                report.deactivated += 1;
            }
            Ok(())
        })?;
        Ok(report)
    }

    /// Re-checks expiry on the stored card. `true` when it was switched off.
    fn deactivate(&self, user_id: &str, now: DateTime<Utc>) -> LoyaltyResult<bool> {
        let mut changed = false;
        let card = self.cards.update(user_id, &mut |c: &mut LoyaltyCard| {
            changed = c.is_active && c.is_expired(now);
            if changed {
                c.is_active = false;
            }
            Ok(())
        })?;
        if !changed {
            return Ok(false);
        }
        info!(
            user_id = %card.user_id,
            card_number = %card.card_number,
            expired_at = %card.expires_at,
            "Card deactivated"
        );
        self.events.emit(make_event(
            EventType::CardDeactivated,
            EventPayload::Card {
                user_id: card.user_id,
                card_number: card.card_number,
            },
        ));
        Ok(true)
    }

    /// Visit every card, one page in memory at a time.
    fn scan(&self, mut visit: impl FnMut(&LoyaltyCard) -> LoyaltyResult<()>) -> LoyaltyResult<()> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.cards.page_after(cursor.as_deref(), self.scan_page_size)?;
            for card in &page {
                visit(card)?;
            }
            match page.last() {
                Some(last) if page.len() == self.scan_page_size => {
                    cursor = Some(last.user_id.clone());
                }
                _ => return Ok(()),
            }
        }
    }
}

fn expiry_message(formatted_expiry: &str) -> String {
    format!("Your loyalty benefits expire on {formatted_expiry}")
}
