use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CardId, Cents, UserId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Topup,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "topup",
            TransactionType::Expense => "expense",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topup" => Ok(TransactionType::Topup),
            "expense" => Ok(TransactionType::Expense),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an entry is for. Commission is tagged explicitly so it can be told apart
/// from ordinary spend without looking at the free-text description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionCategory {
    Regular,
    Commission,
}

impl TransactionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Regular => "regular",
            TransactionCategory::Commission => "commission",
        }
    }
}

impl FromStr for TransactionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(TransactionCategory::Regular),
            "commission" => Ok(TransactionCategory::Commission),
            other => Err(format!("unknown transaction category '{}'", other)),
        }
    }
}

/// A ledger entry for one card. Never deleted; the only mutation allowed
/// after insert is the soft cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTransaction {
    pub id: TransactionId,
    /// Global creation order, assigned by the repository.
    pub sequence: i64,
    pub card_id: CardId,
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    /// Signed: positive for top-ups, negative for expenses.
    pub amount: Cents,
    pub currency: String,
    pub balance_before: Cents,
    pub balance_after: Cents,
    pub description: Option<String>,
    pub created_by: UserId,
    /// Business day the entry belongs to.
    pub transaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub is_cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
}

/// Who/when for entries produced by one ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub date: NaiveDate,
    pub at: DateTime<Utc>,
    pub by: UserId,
}

impl CardTransaction {
    pub fn topup(
        card_id: CardId,
        currency: &str,
        amount: Cents,
        balance_before: Cents,
        posting: Posting,
    ) -> Self {
        assert!(amount > 0, "Top-up amount must be positive");
        Self::entry(
            card_id,
            currency,
            TransactionType::Topup,
            TransactionCategory::Regular,
            amount,
            balance_before,
            balance_before + amount,
            posting,
        )
    }

    /// Expense of `spent` (positive) ending at `balance_after`.
    pub fn expense(
        card_id: CardId,
        currency: &str,
        category: TransactionCategory,
        spent: Cents,
        balance_before: Cents,
        balance_after: Cents,
        posting: Posting,
    ) -> Self {
        assert!(spent > 0, "Expense amount must be positive");
        Self::entry(
            card_id,
            currency,
            TransactionType::Expense,
            category,
            -spent,
            balance_before,
            balance_after,
            posting,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn entry(
        card_id: CardId,
        currency: &str,
        transaction_type: TransactionType,
        category: TransactionCategory,
        amount: Cents,
        balance_before: Cents,
        balance_after: Cents,
        posting: Posting,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            card_id,
            transaction_type,
            category,
            amount,
            currency: currency.to_string(),
            balance_before,
            balance_after,
            description: None,
            created_by: posting.by,
            transaction_date: posting.date,
            created_at: posting.at,
            is_cancelled: false,
            cancelled_at: None,
            cancelled_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_commission(&self) -> bool {
        self.category == TransactionCategory::Commission
    }

    /// Unsigned size of the entry.
    pub fn magnitude(&self) -> Cents {
        self.amount.abs()
    }
}
