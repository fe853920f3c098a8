use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Row, Sqlite, Transaction};

use crate::domain::{Card, CardId, CardTransaction, Cents, TransactionId};

use super::repository::{
    CARD_COLUMNS, DATE_FORMAT, TRANSACTION_COLUMNS, row_to_card, row_to_transaction,
};

/// One database transaction covering a ledger operation.
///
/// Dropping it without [`UnitOfWork::commit`] rolls everything back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit")?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back")?;
        Ok(())
    }

    /// Ends the SQLite transaction behind sqlx's back so the next commit fails.
    #[cfg(test)]
    pub(crate) async fn end_behind_back(&mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.tx).await?;
        Ok(())
    }

    // ========================
    // Cards
    // ========================

    pub async fn get_card(&mut self, id: CardId) -> Result<Option<Card>> {
        let row = sqlx::query(&format!("SELECT {} FROM cards c WHERE c.id = ?", CARD_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch card")?;
        row.as_ref().map(row_to_card).transpose()
    }

    pub async fn insert_card(&mut self, card: &Card) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cards (id, name, team_id, buyer_id, currency, balance, remaining_balance,
                               total_spent_calculated, total_top_up, commission_paid, topup_limit,
                               status, deleted_at, last_transaction_date, version, created_at, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(card.id.to_string())
        .bind(&card.name)
        .bind(card.team_id.to_string())
        .bind(card.buyer_id.map(|id| id.to_string()))
        .bind(&card.currency)
        .bind(card.balance)
        .bind(card.remaining_balance)
        .bind(card.total_spent_calculated)
        .bind(card.total_top_up)
        .bind(card.commission_paid)
        .bind(card.topup_limit)
        .bind(card.status.as_str())
        .bind(card.lifecycle.deleted_at().map(|dt| dt.to_rfc3339()))
        .bind(
            card.last_transaction_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
        )
        .bind(card.version)
        .bind(card.created_at.to_rfc3339())
        .bind(card.created_by.to_string())
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert card")?;
        Ok(())
    }

    /// Write the card row back if nobody else touched it since `card.version` was read.
    ///
    /// On success `card.version` is bumped to the stored value. Returns `false`
    /// when the version check fails; the caller must abandon the unit of work.
    pub async fn update_card(&mut self, card: &mut Card) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET buyer_id = ?, balance = ?, remaining_balance = ?, total_spent_calculated = ?,
                total_top_up = ?, commission_paid = ?, topup_limit = ?, status = ?,
                deleted_at = ?, last_transaction_date = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(card.buyer_id.map(|id| id.to_string()))
        .bind(card.balance)
        .bind(card.remaining_balance)
        .bind(card.total_spent_calculated)
        .bind(card.total_top_up)
        .bind(card.commission_paid)
        .bind(card.topup_limit)
        .bind(card.status.as_str())
        .bind(card.lifecycle.deleted_at().map(|dt| dt.to_rfc3339()))
        .bind(
            card.last_transaction_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
        )
        .bind(card.id.to_string())
        .bind(card.version)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update card")?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }
        card.version += 1;
        Ok(true)
    }

    // ========================
    // Transactions
    // ========================

    /// Append an entry. Assigns the next sequence number.
    pub async fn insert_transaction(&mut self, transaction: &mut CardTransaction) -> Result<()> {
        transaction.sequence = self.next_sequence().await?;

        sqlx::query(
            r#"
            INSERT INTO card_transactions (id, sequence, card_id, transaction_type, category, amount,
                                           currency, balance_before, balance_after, description,
                                           created_by, transaction_date, created_at, is_cancelled,
                                           cancelled_at, cancelled_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.sequence)
        .bind(transaction.card_id.to_string())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.category.as_str())
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.balance_before)
        .bind(transaction.balance_after)
        .bind(&transaction.description)
        .bind(transaction.created_by.to_string())
        .bind(transaction.transaction_date.format(DATE_FORMAT).to_string())
        .bind(transaction.created_at.to_rfc3339())
        .bind(transaction.is_cancelled)
        .bind(transaction.cancelled_at.map(|dt| dt.to_rfc3339()))
        .bind(transaction.cancelled_by.map(|id| id.to_string()))
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert transaction")?;

        Ok(())
    }

    async fn next_sequence(&mut self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'card_transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    pub async fn get_transaction(&mut self, id: TransactionId) -> Result<Option<CardTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM card_transactions t WHERE t.id = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch transaction")?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    /// Flag an entry as cancelled. Only flips live entries; returns `false`
    /// if the entry was already cancelled.
    pub async fn mark_cancelled(&mut self, transaction: &CardTransaction) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE card_transactions
            SET is_cancelled = 1, cancelled_at = ?, cancelled_by = ?
            WHERE id = ? AND is_cancelled = 0
            "#,
        )
        .bind(transaction.cancelled_at.map(|dt| dt.to_rfc3339()))
        .bind(transaction.cancelled_by.map(|id| id.to_string()))
        .bind(transaction.id.to_string())
        .execute(&mut *self.tx)
        .await
        .context("Failed to cancel transaction")?;
        Ok(result.rows_affected() == 1)
    }

    /// Whether a live commission entry exists for the card.
    pub async fn commission_charged(&mut self, card_id: CardId) -> Result<bool> {
        let count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM card_transactions
            WHERE card_id = ? AND category = 'commission' AND is_cancelled = 0
            "#,
        )
        .bind(card_id.to_string())
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to look up commission")?
        .get("count");
        Ok(count > 0)
    }

    /// Sum of live top-ups booked for the card on `date`.
    pub async fn sum_topups_on(&mut self, card_id: CardId, date: NaiveDate) -> Result<Cents> {
        let total: i64 = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) as total
            FROM card_transactions
            WHERE card_id = ? AND transaction_type = 'topup' AND is_cancelled = 0
              AND transaction_date = ?
            "#,
        )
        .bind(card_id.to_string())
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to sum daily top-ups")?
        .get("total");
        Ok(total)
    }
}
