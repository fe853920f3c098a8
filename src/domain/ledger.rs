//! Card balance arithmetic.
//!
//! Every operation here is pure: it takes the current card row (plus whatever
//! the caller looked up in the transaction log) and returns the card row to
//! write back together with the entries to append. Persisting a plan is the
//! application layer's job and always happens inside one database transaction.

use serde::{Deserialize, Serialize};

use super::{
    Card, CardId, CardStatus, CardTransaction, Cents, Posting, TransactionCategory,
    TransactionType,
};

/// Flat fee charged once per card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionPolicy {
    pub flat_fee: Cents,
}

/// Card row after an operation and the entries it produced, in order.
#[derive(Debug, Clone)]
pub struct LedgerPlan {
    pub card: Card,
    pub entries: Vec<CardTransaction>,
}

/// Input of a daily balance update.
#[derive(Debug, Clone, Default)]
pub struct DailyUpdate {
    /// Balance reported by the issuer. Spend is the drop from the tracked balance.
    pub reported_balance: Option<Cents>,
    /// Money loaded onto the card. Zero means no top-up.
    pub topup_amount: Cents,
    pub description: Option<String>,
}

/// Facts from the transaction log a daily update depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayContext {
    /// A live commission entry already exists for the card.
    pub commission_charged: bool,
    /// Sum of live top-ups already recorded on the posting date.
    pub topups_today: Cents,
}

/// Aggregate counters of a card, either stored or re-derived from its log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAggregates {
    pub balance: Cents,
    pub total_top_up: Cents,
    pub total_spent_calculated: Cents,
    pub commission_paid: Cents,
}

impl CardAggregates {
    pub fn of(card: &Card) -> Self {
        Self {
            balance: card.balance,
            total_top_up: card.total_top_up,
            total_spent_calculated: card.total_spent_calculated,
            commission_paid: card.commission_paid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    NegativeAmount { field: &'static str, amount: Cents },
    EmptyUpdate,
    AlreadyCancelled,
    ForeignTransaction { card_id: CardId },
    /// Applying the amount would overflow a card counter.
    AmountOutOfRange { field: &'static str, amount: Cents },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::NegativeAmount { field, amount } => {
                write!(f, "{} must not be negative (got {} cents)", field, amount)
            }
            LedgerError::EmptyUpdate => {
                write!(f, "update needs a top-up amount or a reported balance")
            }
            LedgerError::AlreadyCancelled => write!(f, "transaction is already cancelled"),
            LedgerError::ForeignTransaction { card_id } => {
                write!(f, "transaction does not belong to card {}", card_id)
            }
            LedgerError::AmountOutOfRange { field, amount } => {
                write!(f, "{} of {} cents is out of range for this card", field, amount)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

const INITIAL_DESCRIPTION: &str = "Initial balance";
const TOPUP_DESCRIPTION: &str = "Top-up";
const COMMISSION_DESCRIPTION: &str = "Commission";

fn non_negative(field: &'static str, amount: Cents) -> Result<(), LedgerError> {
    if amount < 0 {
        return Err(LedgerError::NegativeAmount { field, amount });
    }
    Ok(())
}

fn checked_add(field: &'static str, counter: Cents, amount: Cents) -> Result<Cents, LedgerError> {
    counter
        .checked_add(amount)
        .ok_or(LedgerError::AmountOutOfRange { field, amount })
}

/// Book the commission right after a top-up.
/// The entry always carries the full fee; the card balance is floored at 0.
fn charge_commission(
    card: &mut Card,
    entries: &mut Vec<CardTransaction>,
    fee: Cents,
    posting: Posting,
) {
    let before = card.balance;
    let after = (before - fee).max(0);
    entries.push(
        CardTransaction::expense(
            card.id,
            &card.currency,
            TransactionCategory::Commission,
            fee,
            before,
            after,
            posting,
        )
        .with_description(COMMISSION_DESCRIPTION),
    );
    card.balance = after;
    card.commission_paid += fee;
}

/// Fund a freshly created card.
///
/// A positive `initial_balance` is booked as a top-up from zero; a positive
/// `commission` then follows as a commission expense. Zero funding books nothing.
pub fn plan_initial_funding(
    card: &Card,
    initial_balance: Cents,
    commission: Cents,
    posting: Posting,
) -> Result<LedgerPlan, LedgerError> {
    non_negative("initial balance", initial_balance)?;
    non_negative("commission", commission)?;

    let mut card = card.clone();
    let mut entries = Vec::new();

    if initial_balance > 0 {
        entries.push(
            CardTransaction::topup(card.id, &card.currency, initial_balance, 0, posting)
                .with_description(INITIAL_DESCRIPTION),
        );
        card.balance = initial_balance;
        card.total_top_up = initial_balance;

        if commission > 0 {
            charge_commission(&mut card, &mut entries, commission, posting);
        }

        card.remaining_balance = card.balance;
        card.last_transaction_date = Some(posting.date);
    }

    Ok(LedgerPlan { card, entries })
}

/// Apply one daily update.
///
/// When a reported balance is given, the drop from the tracked balance is
/// booked as spend and the tracked balance follows the report. When a top-up
/// is given it is applied afterwards, on top of the reported balance. Both in
/// one call is allowed: the spend is inferred first, then the money is loaded.
///
/// The first top-up of a card without a live commission entry (and with
/// nothing in `commission_paid`) is charged the flat commission. Reaching the
/// daily top-up limit moves an active card to `limit_exceeded`.
pub fn plan_daily_update(
    card: &Card,
    update: &DailyUpdate,
    context: DayContext,
    policy: CommissionPolicy,
    posting: Posting,
) -> Result<LedgerPlan, LedgerError> {
    non_negative("top-up amount", update.topup_amount)?;
    if let Some(reported) = update.reported_balance {
        non_negative("reported balance", reported)?;
    }
    if update.topup_amount == 0 && update.reported_balance.is_none() {
        return Err(LedgerError::EmptyUpdate);
    }

    let mut card = card.clone();
    let mut entries = Vec::new();

    if let Some(reported) = update.reported_balance {
        let spent = (card.balance - reported).max(0);
        if spent > 0 {
            let description = update
                .description
                .clone()
                .unwrap_or_else(|| format!("Spend for {}", posting.date));
            entries.push(
                CardTransaction::expense(
                    card.id,
                    &card.currency,
                    TransactionCategory::Regular,
                    spent,
                    card.balance,
                    reported,
                    posting,
                )
                .with_description(description),
            );
        }
        card.balance = reported;
        card.remaining_balance = reported;
        card.total_spent_calculated =
            checked_add("spend", card.total_spent_calculated, spent)?;
    }

    if update.topup_amount > 0 {
        let amount = update.topup_amount;
        let balance = checked_add("top-up amount", card.balance, amount)?;
        let total_top_up = checked_add("top-up amount", card.total_top_up, amount)?;
        entries.push(
            CardTransaction::topup(card.id, &card.currency, amount, card.balance, posting)
                .with_description(
                    update
                        .description
                        .clone()
                        .unwrap_or_else(|| TOPUP_DESCRIPTION.to_string()),
                ),
        );
        card.balance = balance;
        card.total_top_up = total_top_up;

        let already_charged = context.commission_charged || card.commission_paid > 0;
        if !already_charged && policy.flat_fee > 0 {
            charge_commission(&mut card, &mut entries, policy.flat_fee, posting);
        }
        card.remaining_balance = card.balance;

        if card.status == CardStatus::Active
            && daily_limit_reached(card.topup_limit, context.topups_today.saturating_add(amount))
        {
            card.status = CardStatus::LimitExceeded;
        }
    }

    // Backdated entries never move the activity date backwards.
    if !entries.is_empty() {
        card.last_transaction_date = card.last_transaction_date.max(Some(posting.date));
    }

    Ok(LedgerPlan { card, entries })
}

/// `true` when the day's top-ups meet or exceed the card's limit.
/// Cards without a limit never trip it.
pub fn daily_limit_reached(limit: Option<Cents>, topups_today: Cents) -> bool {
    matches!(limit, Some(limit) if topups_today >= limit)
}

/// Plan for voiding one entry.
#[derive(Debug, Clone)]
pub struct CancellationPlan {
    pub card: Card,
    pub transaction: CardTransaction,
}

/// Void `transaction` and undo its effect on the card's counters.
///
/// Top-ups come off `balance` and `total_top_up`; expenses go back onto
/// `balance` and come off `total_spent_calculated`, or `commission_paid` for
/// commission entries. Every counter is clamped at 0 afterwards.
pub fn plan_cancellation(
    card: &Card,
    transaction: &CardTransaction,
    posting: Posting,
) -> Result<CancellationPlan, LedgerError> {
    if transaction.card_id != card.id {
        return Err(LedgerError::ForeignTransaction { card_id: card.id });
    }
    if transaction.is_cancelled {
        return Err(LedgerError::AlreadyCancelled);
    }

    let mut card = card.clone();
    let magnitude = transaction.magnitude();

    match (transaction.transaction_type, transaction.category) {
        (TransactionType::Topup, _) => {
            card.balance -= magnitude;
            card.total_top_up -= magnitude;
        }
        (TransactionType::Expense, TransactionCategory::Commission) => {
            card.balance = card.balance.saturating_add(magnitude);
            card.commission_paid -= magnitude;
        }
        (TransactionType::Expense, TransactionCategory::Regular) => {
            card.balance = card.balance.saturating_add(magnitude);
            card.total_spent_calculated -= magnitude;
        }
    }

    card.balance = card.balance.max(0);
    card.total_top_up = card.total_top_up.max(0);
    card.total_spent_calculated = card.total_spent_calculated.max(0);
    card.commission_paid = card.commission_paid.max(0);

    let mut cancelled = transaction.clone();
    cancelled.is_cancelled = true;
    cancelled.cancelled_at = Some(posting.at);
    cancelled.cancelled_by = Some(posting.by);

    Ok(CancellationPlan {
        card,
        transaction: cancelled,
    })
}

/// Recompute a card's counters from its log, skipping cancelled entries.
///
/// Entries are replayed in sequence order and the running balance is floored
/// at 0 after each one, the same floor commission charges and cancellations
/// apply when they write the card.
pub fn derive_aggregates(transactions: &[CardTransaction]) -> CardAggregates {
    let mut live: Vec<&CardTransaction> =
        transactions.iter().filter(|t| !t.is_cancelled).collect();
    live.sort_by_key(|t| t.sequence);
    live.into_iter()
        .fold(CardAggregates::default(), |mut acc, t| {
            acc.balance = acc.balance.saturating_add(t.amount).max(0);
            match (t.transaction_type, t.category) {
                (TransactionType::Topup, _) => {
                    acc.total_top_up = acc.total_top_up.saturating_add(t.amount)
                }
                (TransactionType::Expense, TransactionCategory::Commission) => {
                    acc.commission_paid += t.magnitude()
                }
                (TransactionType::Expense, TransactionCategory::Regular) => {
                    acc.total_spent_calculated += t.magnitude()
                }
            }
            acc
        })
}

/// Stored counters that disagree with the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDrift {
    pub card_id: CardId,
    pub card_name: String,
    pub stored: CardAggregates,
    pub derived: CardAggregates,
}

/// Compare a card's stored counters with its log.
pub fn check_card(card: &Card, transactions: &[CardTransaction]) -> Option<AggregateDrift> {
    let stored = CardAggregates::of(card);
    let derived = derive_aggregates(transactions);
    (stored != derived).then(|| AggregateDrift {
        card_id: card.id,
        card_name: card.name.clone(),
        stored,
        derived,
    })
}
