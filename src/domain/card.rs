use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{BuyerId, Cents, TeamId, UserId};

pub type CardId = Uuid;

/// Operational state of a card as reported by the issuing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Active,
    Blocked,
    Reissue,
    Error,
    Rebind,
    NotIssued,
    /// Active card with no spend for a while. Usually derived, see [`Card::display_status`].
    NotSpinning,
    /// Daily top-up limit reached.
    LimitExceeded,
}

impl CardStatus {
    pub const ALL: [CardStatus; 8] = [
        CardStatus::Active,
        CardStatus::Blocked,
        CardStatus::Reissue,
        CardStatus::Error,
        CardStatus::Rebind,
        CardStatus::NotIssued,
        CardStatus::NotSpinning,
        CardStatus::LimitExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "active",
            CardStatus::Blocked => "blocked",
            CardStatus::Reissue => "reissue",
            CardStatus::Error => "error",
            CardStatus::Rebind => "rebind",
            CardStatus::NotIssued => "not_issued",
            CardStatus::NotSpinning => "not_spinning",
            CardStatus::LimitExceeded => "limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown card status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for CardStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        CardStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl std::fmt::Display for CardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the card record is still live. Kept apart from [`CardStatus`] so that
/// operational states and soft deletion never share one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CardLifecycle {
    Active,
    Deleted { deleted_at: DateTime<Utc> },
}

impl CardLifecycle {
    pub fn is_deleted(&self) -> bool {
        matches!(self, CardLifecycle::Deleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CardLifecycle::Active => None,
            CardLifecycle::Deleted { deleted_at } => Some(*deleted_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    pub team_id: TeamId,
    pub buyer_id: Option<BuyerId>,
    pub currency: String,
    /// Current spendable amount as tracked by the ledger.
    pub balance: Cents,
    /// Last balance reported from outside; spend is inferred from its deltas.
    pub remaining_balance: Cents,
    pub total_spent_calculated: Cents,
    pub total_top_up: Cents,
    pub commission_paid: Cents,
    pub topup_limit: Option<Cents>,
    pub status: CardStatus,
    pub lifecycle: CardLifecycle,
    pub last_transaction_date: Option<NaiveDate>,
    /// Optimistic concurrency token, bumped on every write of the card row.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl Card {
    pub fn new(
        name: impl Into<String>,
        team_id: TeamId,
        currency: impl Into<String>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            team_id,
            buyer_id: None,
            currency: currency.into(),
            balance: 0,
            remaining_balance: 0,
            total_spent_calculated: 0,
            total_top_up: 0,
            commission_paid: 0,
            topup_limit: None,
            status: CardStatus::Active,
            lifecycle: CardLifecycle::Active,
            last_transaction_date: None,
            version: 0,
            created_at,
            created_by,
        }
    }

    pub fn with_buyer(mut self, buyer_id: BuyerId) -> Self {
        self.buyer_id = Some(buyer_id);
        self
    }

    pub fn with_topup_limit(mut self, limit: Option<Cents>) -> Self {
        self.topup_limit = limit;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }

    /// Status shown to operators. An active card that has not moved for
    /// `idle_days` or more is shown as `not_spinning`; the stored status is untouched.
    /// Cards that never transacted are measured from their creation date.
    pub fn display_status(
        &self,
        today: NaiveDate,
        idle_days: i64,
        created_on: NaiveDate,
    ) -> CardStatus {
        if self.status != CardStatus::Active {
            return self.status;
        }
        let last_activity = self.last_transaction_date.unwrap_or(created_on);
        if today - last_activity >= Duration::days(idle_days) {
            CardStatus::NotSpinning
        } else {
            CardStatus::Active
        }
    }
}
