use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{AggregateDrift, BuyerId, CardId, Cents};

// Helper struct for repository aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPeriodAggregate {
    pub card_id: CardId,
    pub card_name: String,
    pub buyer_id: Option<BuyerId>,
    pub buyer_name: Option<String>,
    pub topup_total: Cents,
    pub expense_total: Cents,
    pub commission_total: Cents,
    pub entry_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPeriodTotals {
    pub card_id: CardId,
    pub card_name: String,
    pub buyer_name: Option<String>,
    pub topup: Cents,
    pub expense: Cents,
    pub commission: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerPeriodTotals {
    pub buyer_id: Option<BuyerId>,
    /// `None` groups cards with no buyer assigned.
    pub buyer_name: Option<String>,
    pub card_count: usize,
    pub topup: Cents,
    pub expense: Cents,
    pub commission: Cents,
}

/// Top-ups and spend per card and per buyer over a date range.
/// Expense totals never include commission; it is reported on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub cards: Vec<CardPeriodTotals>,
    pub buyers: Vec<BuyerPeriodTotals>,
    pub total_topup: Cents,
    pub total_expense: Cents,
    pub total_commission: Cents,
}

impl PeriodReport {
    pub fn from_aggregates(
        from_date: NaiveDate,
        to_date: NaiveDate,
        rows: Vec<CardPeriodAggregate>,
    ) -> Self {
        let mut buyers: BTreeMap<Option<BuyerId>, BuyerPeriodTotals> = BTreeMap::new();
        for row in &rows {
            let entry = buyers.entry(row.buyer_id).or_insert_with(|| BuyerPeriodTotals {
                buyer_id: row.buyer_id,
                buyer_name: row.buyer_name.clone(),
                card_count: 0,
                topup: 0,
                expense: 0,
                commission: 0,
            });
            entry.card_count += 1;
            entry.topup = entry.topup.saturating_add(row.topup_total);
            entry.expense = entry.expense.saturating_add(row.expense_total);
            entry.commission = entry.commission.saturating_add(row.commission_total);
        }

        let mut buyers: Vec<BuyerPeriodTotals> = buyers.into_values().collect();
        // Named buyers alphabetically, unassigned last.
        buyers.sort_by(|a, b| match (&a.buyer_name, &b.buyer_name) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let total = |field: fn(&CardPeriodAggregate) -> Cents| {
            rows.iter().map(field).fold(0, Cents::saturating_add)
        };
        let total_topup = total(|r| r.topup_total);
        let total_expense = total(|r| r.expense_total);
        let total_commission = total(|r| r.commission_total);

        let cards = rows
            .into_iter()
            .map(|r| CardPeriodTotals {
                card_id: r.card_id,
                card_name: r.card_name,
                buyer_name: r.buyer_name,
                topup: r.topup_total,
                expense: r.expense_total,
                commission: r.commission_total,
            })
            .collect();

        Self {
            from_date,
            to_date,
            cards,
            buyers,
            total_topup,
            total_expense,
            total_commission,
        }
    }
}

/// Result of a ledger integrity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub card_count: i64,
    pub transaction_count: i64,
    pub has_sequence_gaps: bool,
    pub broken_chain_entries: i64,
    pub invalid_amounts: i64,
    /// Cards whose stored counters disagree with their transaction log.
    pub drifts: Vec<AggregateDrift>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        !self.has_sequence_gaps
            && self.broken_chain_entries == 0
            && self.invalid_amounts == 0
            && self.drifts.is_empty()
    }
}
