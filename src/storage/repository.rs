use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::application::CardPeriodAggregate;
use crate::domain::{
    Buyer, BuyerId, Card, CardId, CardLifecycle, CardStatus, CardTransaction, Role, Team, TeamId,
    TransactionId, User,
};

use super::{MIGRATION_001_INITIAL, UnitOfWork};

pub(crate) const CARD_COLUMNS: &str = "c.id, c.name, c.team_id, c.buyer_id, c.currency, c.balance, \
     c.remaining_balance, c.total_spent_calculated, c.total_top_up, c.commission_paid, \
     c.topup_limit, c.status, c.deleted_at, c.last_transaction_date, c.version, c.created_at, \
     c.created_by";

pub(crate) const TRANSACTION_COLUMNS: &str = "t.id, t.sequence, t.card_id, t.transaction_type, \
     t.category, t.amount, t.currency, t.balance_before, t.balance_after, t.description, \
     t.created_by, t.transaction_date, t.created_at, t.is_cancelled, t.cancelled_at, \
     t.cancelled_by";

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub card_count: i64,
    pub transaction_count: i64,
    pub has_sequence_gaps: bool,
    /// Entries whose `balance_after` is not `balance_before + amount` (floored at 0).
    pub broken_chain_entries: i64,
    /// Entries whose sign disagrees with their type.
    pub invalid_amounts: i64,
}

/// Filters for card listings.
#[derive(Debug, Clone, Default)]
pub struct CardQuery {
    pub team_id: Option<TeamId>,
    pub buyer_id: Option<BuyerId>,
    pub status: Option<CardStatus>,
    pub include_deleted: bool,
}

/// Filters for transaction listings.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub card_id: Option<CardId>,
    pub team_id: Option<TeamId>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub include_cancelled: bool,
    pub limit: Option<usize>,
}

/// Repository for persisting and querying teams, users, cards and their ledger.
///
/// Reads go straight to the pool. Anything that moves money goes through a
/// [`UnitOfWork`] obtained from [`Repository::begin`].
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a database transaction for a multi-statement ledger write.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(UnitOfWork::new(tx))
    }

    // ========================
    // Teams and buyers
    // ========================

    pub async fn save_team(&self, team: &Team) -> Result<()> {
        sqlx::query("INSERT INTO teams (id, name, created_at) VALUES (?, ?, ?)")
            .bind(team.id.to_string())
            .bind(&team.name)
            .bind(team.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save team")?;
        Ok(())
    }

    pub async fn get_team(&self, id: TeamId) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT id, name, created_at FROM teams WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch team")?;
        row.as_ref().map(row_to_team).transpose()
    }

    pub async fn get_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT id, name, created_at FROM teams WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch team by name")?;
        row.as_ref().map(row_to_team).transpose()
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM teams ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list teams")?;
        rows.iter().map(row_to_team).collect()
    }

    pub async fn save_buyer(&self, buyer: &Buyer) -> Result<()> {
        sqlx::query("INSERT INTO team_buyers (id, team_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(buyer.id.to_string())
            .bind(buyer.team_id.to_string())
            .bind(&buyer.name)
            .bind(buyer.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save buyer")?;
        Ok(())
    }

    pub async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>> {
        let row = sqlx::query("SELECT id, team_id, name, created_at FROM team_buyers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch buyer")?;
        row.as_ref().map(row_to_buyer).transpose()
    }

    pub async fn get_buyer_by_name(&self, team_id: TeamId, name: &str) -> Result<Option<Buyer>> {
        let row = sqlx::query(
            "SELECT id, team_id, name, created_at FROM team_buyers WHERE team_id = ? AND name = ?",
        )
        .bind(team_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch buyer by name")?;
        row.as_ref().map(row_to_buyer).transpose()
    }

    pub async fn list_buyers(&self, team_id: Option<TeamId>) -> Result<Vec<Buyer>> {
        let rows = match team_id {
            Some(team_id) => sqlx::query(
                "SELECT id, team_id, name, created_at FROM team_buyers WHERE team_id = ? ORDER BY name",
            )
            .bind(team_id.to_string())
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query("SELECT id, team_id, name, created_at FROM team_buyers ORDER BY name")
                .fetch_all(&self.pool)
                .await,
        }
        .context("Failed to list buyers")?;
        rows.iter().map(row_to_buyer).collect()
    }

    // ========================
    // Users
    // ========================

    pub async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, role, team_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(user.role.as_str())
        .bind(user.team_id.map(|id| id.to_string()))
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save user")?;
        Ok(())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, role, team_id, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn list_users(&self, team_id: Option<TeamId>) -> Result<Vec<User>> {
        let rows = match team_id {
            Some(team_id) => sqlx::query(
                "SELECT id, username, role, team_id, created_at FROM users WHERE team_id = ? ORDER BY username",
            )
            .bind(team_id.to_string())
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(
                "SELECT id, username, role, team_id, created_at FROM users ORDER BY username",
            )
            .fetch_all(&self.pool)
            .await,
        }
        .context("Failed to list users")?;
        rows.iter().map(row_to_user).collect()
    }

    pub async fn count_users(&self) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) as count FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?
            .get("count");
        Ok(count)
    }

    // ========================
    // Cards
    // ========================

    pub async fn get_card(&self, id: CardId) -> Result<Option<Card>> {
        let row = sqlx::query(&format!("SELECT {} FROM cards c WHERE c.id = ?", CARD_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch card")?;
        row.as_ref().map(row_to_card).transpose()
    }

    /// Live cards with the given name, optionally restricted to one team.
    pub async fn find_cards_by_name(&self, name: &str, team_id: Option<TeamId>) -> Result<Vec<Card>> {
        let mut query = format!(
            "SELECT {} FROM cards c WHERE c.name = ? AND c.deleted_at IS NULL",
            CARD_COLUMNS
        );
        if team_id.is_some() {
            query.push_str(" AND c.team_id = ?");
        }

        let team_id_str = team_id.map(|id| id.to_string());
        let mut sql_query = sqlx::query(&query).bind(name);
        if let Some(ref tid) = team_id_str {
            sql_query = sql_query.bind(tid);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to find cards by name")?;
        rows.iter().map(row_to_card).collect()
    }

    pub async fn list_cards(&self, filter: &CardQuery) -> Result<Vec<Card>> {
        let mut query = format!("SELECT {} FROM cards c WHERE 1=1", CARD_COLUMNS);

        let team_id_str = filter.team_id.map(|id| id.to_string());
        let buyer_id_str = filter.buyer_id.map(|id| id.to_string());

        if !filter.include_deleted {
            query.push_str(" AND c.deleted_at IS NULL");
        }
        if team_id_str.is_some() {
            query.push_str(" AND c.team_id = ?");
        }
        if buyer_id_str.is_some() {
            query.push_str(" AND c.buyer_id = ?");
        }
        if filter.status.is_some() {
            query.push_str(" AND c.status = ?");
        }
        query.push_str(" ORDER BY c.name");

        let mut sql_query = sqlx::query(&query);
        if let Some(ref tid) = team_id_str {
            sql_query = sql_query.bind(tid);
        }
        if let Some(ref bid) = buyer_id_str {
            sql_query = sql_query.bind(bid);
        }
        if let Some(status) = filter.status {
            sql_query = sql_query.bind(status.as_str());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list cards")?;
        rows.iter().map(row_to_card).collect()
    }

    // ========================
    // Transactions
    // ========================

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<CardTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM card_transactions t WHERE t.id = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    /// Full log of a card, cancelled entries included, in creation order.
    pub async fn list_transactions_for_card(&self, card_id: CardId) -> Result<Vec<CardTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM card_transactions t WHERE t.card_id = ? ORDER BY t.sequence",
            TRANSACTION_COLUMNS
        ))
        .bind(card_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for card")?;
        rows.iter().map(row_to_transaction).collect()
    }

    /// List transactions with optional filters, newest first.
    pub async fn list_transactions(&self, filter: &TransactionQuery) -> Result<Vec<CardTransaction>> {
        let mut query = format!(
            "SELECT {} FROM card_transactions t JOIN cards c ON c.id = t.card_id WHERE 1=1",
            TRANSACTION_COLUMNS
        );

        // Collect all string bindings first so they live long enough
        let card_id_str = filter.card_id.map(|id| id.to_string());
        let team_id_str = filter.team_id.map(|id| id.to_string());
        let from_str = filter.from_date.map(|d| d.format(DATE_FORMAT).to_string());
        let to_str = filter.to_date.map(|d| d.format(DATE_FORMAT).to_string());

        if card_id_str.is_some() {
            query.push_str(" AND t.card_id = ?");
        }
        if team_id_str.is_some() {
            query.push_str(" AND c.team_id = ?");
        }
        if from_str.is_some() {
            query.push_str(" AND t.transaction_date >= ?");
        }
        if to_str.is_some() {
            query.push_str(" AND t.transaction_date <= ?");
        }
        if !filter.include_cancelled {
            query.push_str(" AND t.is_cancelled = 0");
        }

        query.push_str(" ORDER BY t.sequence DESC");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        for value in [&card_id_str, &team_id_str, &from_str, &to_str]
            .into_iter()
            .flatten()
        {
            sql_query = sql_query.bind(value);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;
        rows.iter().map(row_to_transaction).collect()
    }

    /// Per-card sums of live entries dated within `[from, to]`.
    /// Commission is summed apart from ordinary spend.
    pub async fn sum_period_by_card(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        team_id: Option<TeamId>,
    ) -> Result<Vec<CardPeriodAggregate>> {
        let mut query = String::from(
            r#"
            SELECT
                c.id AS card_id,
                c.name AS card_name,
                c.buyer_id AS buyer_id,
                b.name AS buyer_name,
                COALESCE(SUM(CASE WHEN t.transaction_type = 'topup' THEN ABS(t.amount) ELSE 0 END), 0) AS topup_total,
                COALESCE(SUM(CASE WHEN t.transaction_type = 'expense' AND t.category = 'regular' THEN ABS(t.amount) ELSE 0 END), 0) AS expense_total,
                COALESCE(SUM(CASE WHEN t.category = 'commission' THEN ABS(t.amount) ELSE 0 END), 0) AS commission_total,
                COUNT(t.id) AS entry_count
            FROM card_transactions t
            JOIN cards c ON c.id = t.card_id
            LEFT JOIN team_buyers b ON b.id = c.buyer_id
            WHERE t.is_cancelled = 0
              AND t.transaction_date BETWEEN ? AND ?
            "#,
        );
        if team_id.is_some() {
            query.push_str(" AND c.team_id = ?");
        }
        query.push_str(" GROUP BY c.id, c.name, c.buyer_id, b.name ORDER BY c.name");

        let team_id_str = team_id.map(|id| id.to_string());
        let mut sql_query = sqlx::query(&query)
            .bind(from.format(DATE_FORMAT).to_string())
            .bind(to.format(DATE_FORMAT).to_string());
        if let Some(ref tid) = team_id_str {
            sql_query = sql_query.bind(tid);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to aggregate period totals")?;

        rows.iter()
            .map(|row| {
                let card_id: String = row.get("card_id");
                let buyer_id: Option<String> = row.get("buyer_id");
                Ok(CardPeriodAggregate {
                    card_id: parse_uuid(&card_id, "card ID")?,
                    card_name: row.get("card_name"),
                    buyer_id: buyer_id
                        .as_deref()
                        .map(|s| parse_uuid(s, "buyer ID"))
                        .transpose()?,
                    buyer_name: row.get("buyer_name"),
                    topup_total: row.get("topup_total"),
                    expense_total: row.get("expense_total"),
                    commission_total: row.get("commission_total"),
                    entry_count: row.get("entry_count"),
                })
            })
            .collect()
    }

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let card_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM cards")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let sequence_check = sqlx::query(
            r#"
            SELECT
                MIN(sequence) as min_seq,
                MAX(sequence) as max_seq,
                COUNT(*) as count
            FROM card_transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let min_seq: Option<i64> = sequence_check.get("min_seq");
        let max_seq: Option<i64> = sequence_check.get("max_seq");
        let transaction_count: i64 = sequence_check.get("count");

        let has_sequence_gaps = match (min_seq, max_seq) {
            (Some(min), Some(max)) => (max - min + 1) != transaction_count,
            _ => false,
        };

        let broken_chain_entries: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM card_transactions
            WHERE balance_after <> MAX(balance_before + amount, 0)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let invalid_amounts: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM card_transactions
            WHERE (transaction_type = 'topup' AND amount <= 0)
               OR (transaction_type = 'expense' AND amount >= 0)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(IntegrityStats {
            card_count,
            transaction_count,
            has_sequence_gaps,
            broken_chain_entries,
            invalid_amounts,
        })
    }
}

// ========================
// Row mapping
// ========================

pub(crate) fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {}: {}", what, value))
}

pub(crate) fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {} timestamp: {}", what, value))?
        .with_timezone(&Utc))
}

pub(crate) fn parse_date(value: &str, what: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("Invalid {} date: {}", what, value))
}

fn row_to_team(row: &SqliteRow) -> Result<Team> {
    let id_str: String = row.get("id");
    let created_at_str: String = row.get("created_at");
    Ok(Team {
        id: parse_uuid(&id_str, "team ID")?,
        name: row.get("name"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_buyer(row: &SqliteRow) -> Result<Buyer> {
    let id_str: String = row.get("id");
    let team_id_str: String = row.get("team_id");
    let created_at_str: String = row.get("created_at");
    Ok(Buyer {
        id: parse_uuid(&id_str, "buyer ID")?,
        team_id: parse_uuid(&team_id_str, "team ID")?,
        name: row.get("name"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let id_str: String = row.get("id");
    let role_str: String = row.get("role");
    let team_id_str: Option<String> = row.get("team_id");
    let created_at_str: String = row.get("created_at");
    Ok(User {
        id: parse_uuid(&id_str, "user ID")?,
        username: row.get("username"),
        role: role_str
            .parse::<Role>()
            .map_err(|e| anyhow::anyhow!(e))?,
        team_id: team_id_str
            .as_deref()
            .map(|s| parse_uuid(s, "team ID"))
            .transpose()?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

pub(crate) fn row_to_card(row: &SqliteRow) -> Result<Card> {
    let id_str: String = row.get("id");
    let team_id_str: String = row.get("team_id");
    let buyer_id_str: Option<String> = row.get("buyer_id");
    let status_str: String = row.get("status");
    let deleted_at_str: Option<String> = row.get("deleted_at");
    let last_date_str: Option<String> = row.get("last_transaction_date");
    let created_at_str: String = row.get("created_at");
    let created_by_str: String = row.get("created_by");

    let lifecycle = match deleted_at_str {
        Some(s) => CardLifecycle::Deleted {
            deleted_at: parse_timestamp(&s, "deleted_at")?,
        },
        None => CardLifecycle::Active,
    };

    Ok(Card {
        id: parse_uuid(&id_str, "card ID")?,
        name: row.get("name"),
        team_id: parse_uuid(&team_id_str, "team ID")?,
        buyer_id: buyer_id_str
            .as_deref()
            .map(|s| parse_uuid(s, "buyer ID"))
            .transpose()?,
        currency: row.get("currency"),
        balance: row.get("balance"),
        remaining_balance: row.get("remaining_balance"),
        total_spent_calculated: row.get("total_spent_calculated"),
        total_top_up: row.get("total_top_up"),
        commission_paid: row.get("commission_paid"),
        topup_limit: row.get("topup_limit"),
        status: status_str.parse::<CardStatus>()?,
        lifecycle,
        last_transaction_date: last_date_str
            .as_deref()
            .map(|s| parse_date(s, "last_transaction_date"))
            .transpose()?,
        version: row.get("version"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        created_by: parse_uuid(&created_by_str, "user ID")?,
    })
}

pub(crate) fn row_to_transaction(row: &SqliteRow) -> Result<CardTransaction> {
    let id_str: String = row.get("id");
    let card_id_str: String = row.get("card_id");
    let type_str: String = row.get("transaction_type");
    let category_str: String = row.get("category");
    let created_by_str: String = row.get("created_by");
    let date_str: String = row.get("transaction_date");
    let created_at_str: String = row.get("created_at");
    let cancelled_at_str: Option<String> = row.get("cancelled_at");
    let cancelled_by_str: Option<String> = row.get("cancelled_by");

    Ok(CardTransaction {
        id: parse_uuid(&id_str, "transaction ID")?,
        sequence: row.get("sequence"),
        card_id: parse_uuid(&card_id_str, "card ID")?,
        transaction_type: type_str.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        category: category_str
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        amount: row.get("amount"),
        currency: row.get("currency"),
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        description: row.get("description"),
        created_by: parse_uuid(&created_by_str, "user ID")?,
        transaction_date: parse_date(&date_str, "transaction")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        is_cancelled: row.get::<i32, _>("is_cancelled") != 0,
        cancelled_at: cancelled_at_str
            .as_deref()
            .map(|s| parse_timestamp(s, "cancelled_at"))
            .transpose()?,
        cancelled_by: cancelled_by_str
            .as_deref()
            .map(|s| parse_uuid(s, "user ID"))
            .transpose()?,
    })
}
