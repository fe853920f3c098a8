use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{LedgerConfig, is_currency_code};
use crate::domain::{
    Actor, BusinessCalendar, Buyer, BuyerId, CancellationPlan, Card, CardLifecycle, CardStatus,
    CardTransaction, Cents, Clock, CommissionPolicy, DailyUpdate, DayContext, LedgerPlan, Posting,
    Role, SystemClock, Team, TeamId, TransactionId, User, check_card, format_cents,
    plan_cancellation, plan_daily_update, plan_initial_funding,
};
use crate::storage::{CardQuery, Repository, TransactionQuery, UnitOfWork};

use super::{
    AppError, AuthzError, IntegrityReport, PeriodReport, Permission, authorize,
    authorize_for_team,
};

/// Application service for the card ledger.
/// Every client (CLI, exporters, tests) goes through it; it owns
/// authorization, transactions and the clock.
pub struct CardService {
    repo: Repository,
    config: LedgerConfig,
    calendar: BusinessCalendar,
    clock: Arc<dyn Clock>,
}

/// Card as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct CardView {
    pub card: Card,
    /// Stored status, except idle active cards which show as `not_spinning`.
    pub display_status: CardStatus,
    pub team_name: String,
    pub buyer_name: Option<String>,
}

/// Input for creating a card.
#[derive(Debug, Clone, Default)]
pub struct NewCard {
    pub name: String,
    /// Team name. Defaults to the actor's own team.
    pub team: Option<String>,
    /// Buyer name or id within the card's team.
    pub buyer: Option<String>,
    pub currency: Option<String>,
    pub initial_balance: Cents,
    /// Overrides the configured commission for the initial funding.
    pub commission: Option<Cents>,
    pub topup_limit: Option<Cents>,
}

/// Input of a daily balance update.
#[derive(Debug, Clone, Default)]
pub struct BalanceUpdate {
    pub reported_balance: Option<Cents>,
    pub topup_amount: Option<Cents>,
    /// Posting date. Defaults to today in the business calendar.
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
}

/// Filter for listing cards
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub team: Option<String>,
    pub buyer: Option<String>,
    /// Matched against the display status.
    pub status: Option<CardStatus>,
    pub include_deleted: bool,
}

/// Filter for listing transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub card: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub include_cancelled: bool,
    pub limit: Option<usize>,
}

/// Card after a ledger write and the entries that write appended.
#[derive(Debug, Clone)]
pub struct LedgerOutcome {
    pub card: Card,
    pub entries: Vec<CardTransaction>,
}

/// Result of cancelling a transaction
#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub card: Card,
    pub transaction: CardTransaction,
}

impl CardService {
    pub fn new(repo: Repository, config: LedgerConfig) -> Result<Self, AppError> {
        config.validate().map_err(invalid_config)?;
        let calendar = config.calendar().map_err(invalid_config)?;
        Ok(Self {
            repo,
            config,
            calendar,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Self::new(repo, config)
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Self::new(repo, config)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Today in the business calendar.
    pub fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }

    fn posting(&self, actor: &Actor, date: NaiveDate) -> Posting {
        Posting {
            date,
            at: self.clock.now(),
            by: actor.user_id,
        }
    }

    // ========================
    // Users and teams
    // ========================

    /// Create the first admin of an empty database.
    #[tracing::instrument(skip(self))]
    pub async fn bootstrap_admin(&self, username: &str) -> Result<User, AppError> {
        let username = required_name(username, "username")?;
        if self.repo.count_users().await? > 0 {
            return Err(AppError::AlreadyExists(
                "user accounts; ask an admin to create yours".to_string(),
            ));
        }

        let user = User::new(username, Role::Admin, None, self.clock.now());
        self.repo.save_user(&user).await?;
        info!(user_id = %user.id, username = %user.username, "admin account created");
        Ok(user)
    }

    /// Resolve a username into the actor every other operation runs as.
    pub async fn authenticate(&self, username: &str) -> Result<Actor, AppError> {
        match self.repo.get_user_by_username(username.trim()).await? {
            Some(user) => Ok(user.actor()),
            None => {
                warn!(username, "unknown user");
                Err(AppError::UnknownUser(username.to_string()))
            }
        }
    }

    pub async fn create_user(
        &self,
        actor: &Actor,
        username: &str,
        role: Role,
        team: Option<&str>,
    ) -> Result<User, AppError> {
        require(actor, Permission::ManageUsers)?;
        let username = required_name(username, "username")?;

        let team_id = match (role.requires_team(), team) {
            (true, Some(name)) => Some(self.team_by_name(name).await?.id),
            (true, None) => return Err(AppError::MissingField("team")),
            (false, Some(_)) => {
                return Err(AppError::InvalidInput(
                    "admin accounts are not tied to a team".to_string(),
                ));
            }
            (false, None) => None,
        };

        if self.repo.get_user_by_username(username).await?.is_some() {
            return Err(AppError::AlreadyExists(format!("user '{}'", username)));
        }

        let user = User::new(username, role, team_id, self.clock.now());
        self.repo.save_user(&user).await?;
        info!(user_id = %user.id, username = %user.username, role = %user.role, "user created");
        Ok(user)
    }

    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<User>, AppError> {
        require(actor, Permission::ManageUsers)?;
        Ok(self.repo.list_users(None).await?)
    }

    pub async fn create_team(&self, actor: &Actor, name: &str) -> Result<Team, AppError> {
        require(actor, Permission::ManageTeams)?;
        let name = required_name(name, "name")?;
        if self.repo.get_team_by_name(name).await?.is_some() {
            return Err(AppError::AlreadyExists(format!("team '{}'", name)));
        }

        let team = Team::new(name, self.clock.now());
        self.repo.save_team(&team).await?;
        info!(team_id = %team.id, name = %team.name, "team created");
        Ok(team)
    }

    /// All teams for admins, the own team for everyone else.
    pub async fn list_teams(&self, actor: &Actor) -> Result<Vec<Team>, AppError> {
        require(actor, Permission::ViewCards)?;
        match actor.team_scope() {
            None => Ok(self.repo.list_teams().await?),
            Some(team_id) => Ok(self.repo.get_team(team_id).await?.into_iter().collect()),
        }
    }

    pub async fn create_buyer(
        &self,
        actor: &Actor,
        team: Option<&str>,
        name: &str,
    ) -> Result<Buyer, AppError> {
        let team = self.resolve_team(actor, team).await?;
        require_for_team(actor, Permission::ManageBuyers, team.id)?;
        let name = required_name(name, "name")?;
        if self.repo.get_buyer_by_name(team.id, name).await?.is_some() {
            return Err(AppError::AlreadyExists(format!(
                "buyer '{}' in team '{}'",
                name, team.name
            )));
        }

        let buyer = Buyer::new(team.id, name, self.clock.now());
        self.repo.save_buyer(&buyer).await?;
        info!(buyer_id = %buyer.id, team = %team.name, name = %buyer.name, "buyer created");
        Ok(buyer)
    }

    pub async fn list_buyers(&self, actor: &Actor, team: Option<&str>) -> Result<Vec<Buyer>, AppError> {
        require(actor, Permission::ViewCards)?;
        let team_id = match team {
            Some(name) => {
                let team = self.team_by_name(name).await?;
                require_for_team(actor, Permission::ViewCards, team.id)?;
                Some(team.id)
            }
            None => actor.team_scope(),
        };
        Ok(self.repo.list_buyers(team_id).await?)
    }

    async fn team_by_name(&self, name: &str) -> Result<Team, AppError> {
        self.repo
            .get_team_by_name(name.trim())
            .await?
            .ok_or_else(|| AppError::TeamNotFound(name.to_string()))
    }

    /// The named team, or the actor's own team when no name is given.
    async fn resolve_team(&self, actor: &Actor, name: Option<&str>) -> Result<Team, AppError> {
        match (name, actor.team_id) {
            (Some(name), _) => self.team_by_name(name).await,
            (None, Some(team_id)) => self
                .repo
                .get_team(team_id)
                .await?
                .ok_or_else(|| AppError::TeamNotFound(team_id.to_string())),
            (None, None) => Err(AppError::MissingField("team")),
        }
    }

    /// Find a buyer of `team` by name or id.
    async fn buyer_in_team(&self, team: &Team, reference: &str) -> Result<Buyer, AppError> {
        let reference = reference.trim();
        if let Ok(id) = Uuid::parse_str(reference) {
            let buyer = self
                .repo
                .get_buyer(id)
                .await?
                .ok_or_else(|| AppError::BuyerNotFound(reference.to_string()))?;
            if buyer.team_id != team.id {
                return Err(AppError::BuyerTeamMismatch {
                    buyer: buyer.name,
                    team: team.name.clone(),
                });
            }
            return Ok(buyer);
        }

        self.repo
            .get_buyer_by_name(team.id, reference)
            .await?
            .ok_or_else(|| AppError::BuyerNotFound(format!("{} (team {})", reference, team.name)))
    }

    // ========================
    // Cards
    // ========================

    /// Create a card and book its initial funding in one database transaction.
    #[tracing::instrument(skip(self, actor, new_card), fields(user_id = %actor.user_id, card = %new_card.name))]
    pub async fn create_card(
        &self,
        actor: &Actor,
        new_card: NewCard,
    ) -> Result<LedgerOutcome, AppError> {
        let team = self.resolve_team(actor, new_card.team.as_deref()).await?;
        require_for_team(actor, Permission::ManageCards, team.id)?;

        let name = required_name(&new_card.name, "name")?;
        let currency = match new_card.currency.as_deref() {
            Some(code) => normalize_currency(code)?,
            None => self.config.default_currency.clone(),
        };
        if new_card.initial_balance < 0 {
            return Err(AppError::InvalidAmount(format!(
                "initial balance must not be negative, got {}",
                format_cents(new_card.initial_balance)
            )));
        }
        let topup_limit =
            positive_limit(new_card.topup_limit.or(self.config.default_topup_limit_cents))?;
        let commission = new_card.commission.unwrap_or(self.config.commission_cents);

        if !self
            .repo
            .find_cards_by_name(name, Some(team.id))
            .await?
            .is_empty()
        {
            return Err(AppError::AlreadyExists(format!(
                "card '{}' in team '{}'",
                name, team.name
            )));
        }

        let mut card = Card::new(name, team.id, currency, actor.user_id, self.clock.now())
            .with_topup_limit(topup_limit);
        if let Some(buyer) = new_card.buyer.as_deref() {
            card = card.with_buyer(self.buyer_in_team(&team, buyer).await?.id);
        }

        let posting = self.posting(actor, self.today());
        let plan = plan_initial_funding(&card, new_card.initial_balance, commission, posting)?;

        let mut uow = self.repo.begin().await?;
        let result = insert_funded_card(&mut uow, plan).await;
        let outcome = self.finish(uow, result, "create_card").await?;

        info!(
            card_id = %outcome.card.id,
            team = %team.name,
            balance = outcome.card.balance,
            entries = outcome.entries.len(),
            "card created"
        );
        Ok(outcome)
    }

    /// Find a live card by id or by name. Names are looked up within the
    /// actor's team; an admin must use the id when two teams share a name.
    pub async fn resolve_card(&self, actor: &Actor, reference: &str) -> Result<Card, AppError> {
        let reference = reference.trim();
        let card = match Uuid::parse_str(reference) {
            Ok(id) => self.repo.get_card(id).await?.filter(|c| !c.is_deleted()),
            Err(_) => {
                let mut matches = self
                    .repo
                    .find_cards_by_name(reference, actor.team_scope())
                    .await?;
                if matches.len() > 1 {
                    return Err(AppError::InvalidInput(format!(
                        "card name '{}' is used in {} teams; use the card id",
                        reference,
                        matches.len()
                    )));
                }
                matches.pop()
            }
        };

        let card = card.ok_or_else(|| AppError::CardNotFound(reference.to_string()))?;
        require_for_team(actor, Permission::ViewCards, card.team_id)?;
        Ok(card)
    }

    pub async fn get_card(&self, actor: &Actor, reference: &str) -> Result<CardView, AppError> {
        let card = self.resolve_card(actor, reference).await?;
        let team_name = self.repo.get_team(card.team_id).await?.map(|t| t.name);
        let buyer_name = match card.buyer_id {
            Some(id) => self.repo.get_buyer(id).await?.map(|b| b.name),
            None => None,
        };
        Ok(self.view(card, team_name, buyer_name))
    }

    pub async fn list_cards(
        &self,
        actor: &Actor,
        filter: &CardFilter,
    ) -> Result<Vec<CardView>, AppError> {
        require(actor, Permission::ViewCards)?;

        let team = if filter.team.is_some() || !actor.is_admin() {
            let team = self.resolve_team(actor, filter.team.as_deref()).await?;
            require_for_team(actor, Permission::ViewCards, team.id)?;
            Some(team)
        } else {
            None
        };
        let buyer_id = match (filter.buyer.as_deref(), &team) {
            (Some(buyer), Some(team)) => Some(self.buyer_in_team(team, buyer).await?.id),
            (Some(_), None) => return Err(AppError::MissingField("team")),
            (None, _) => None,
        };

        // Active and not_spinning depend on activity, so they are matched after the query.
        let stored_status = filter
            .status
            .filter(|s| !matches!(s, CardStatus::Active | CardStatus::NotSpinning));
        let query = CardQuery {
            team_id: team.as_ref().map(|t| t.id),
            buyer_id,
            status: stored_status,
            include_deleted: filter.include_deleted,
        };
        let cards = self.repo.list_cards(&query).await?;

        let team_names: HashMap<TeamId, String> = self
            .repo
            .list_teams()
            .await?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();
        let buyer_names: HashMap<BuyerId, String> = self
            .repo
            .list_buyers(query.team_id)
            .await?
            .into_iter()
            .map(|b| (b.id, b.name))
            .collect();

        Ok(cards
            .into_iter()
            .map(|card| {
                let team_name = team_names.get(&card.team_id).cloned();
                let buyer_name = card.buyer_id.and_then(|id| buyer_names.get(&id).cloned());
                self.view(card, team_name, buyer_name)
            })
            .filter(|view| filter.status.is_none_or(|s| view.display_status == s))
            .collect())
    }

    fn view(&self, card: Card, team_name: Option<String>, buyer_name: Option<String>) -> CardView {
        let created_on = self.calendar.date_of(card.created_at);
        let display_status = card.display_status(self.today(), self.config.idle_days, created_on);
        CardView {
            card,
            display_status,
            team_name: team_name.unwrap_or_default(),
            buyer_name,
        }
    }

    pub async fn set_status(
        &self,
        actor: &Actor,
        reference: &str,
        status: CardStatus,
    ) -> Result<Card, AppError> {
        let card = self.resolve_card(actor, reference).await?;
        require_for_team(actor, Permission::ManageCards, card.team_id)?;

        let card = self
            .modify_card(&card, "set_status", |c| c.status = status)
            .await?;
        info!(card_id = %card.id, status = %status, "card status changed");
        Ok(card)
    }

    /// Assign the card to a buyer of its team, or unassign it with `None`.
    pub async fn assign_buyer(
        &self,
        actor: &Actor,
        reference: &str,
        buyer: Option<&str>,
    ) -> Result<Card, AppError> {
        let card = self.resolve_card(actor, reference).await?;
        require_for_team(actor, Permission::ManageCards, card.team_id)?;

        let buyer_id = match buyer {
            Some(buyer) => {
                let team = self
                    .repo
                    .get_team(card.team_id)
                    .await?
                    .ok_or_else(|| AppError::TeamNotFound(card.team_id.to_string()))?;
                Some(self.buyer_in_team(&team, buyer).await?.id)
            }
            None => None,
        };

        let card = self
            .modify_card(&card, "assign_buyer", |c| c.buyer_id = buyer_id)
            .await?;
        info!(card_id = %card.id, buyer_id = ?card.buyer_id, "card buyer changed");
        Ok(card)
    }

    /// Set or clear the daily top-up limit. Does not touch the status.
    pub async fn set_topup_limit(
        &self,
        actor: &Actor,
        reference: &str,
        limit: Option<Cents>,
    ) -> Result<Card, AppError> {
        let limit = positive_limit(limit)?;
        let card = self.resolve_card(actor, reference).await?;
        require_for_team(actor, Permission::ManageCards, card.team_id)?;

        let card = self
            .modify_card(&card, "set_topup_limit", |c| c.topup_limit = limit)
            .await?;
        info!(card_id = %card.id, limit = ?card.topup_limit, "card top-up limit changed");
        Ok(card)
    }

    /// Soft-delete a card. Its transactions stay in the ledger.
    pub async fn delete_card(&self, actor: &Actor, reference: &str) -> Result<Card, AppError> {
        let card = self.resolve_card(actor, reference).await?;
        require_for_team(actor, Permission::ManageCards, card.team_id)?;

        let deleted_at = self.clock.now();
        let card = self
            .modify_card(&card, "delete_card", |c| {
                c.lifecycle = CardLifecycle::Deleted { deleted_at }
            })
            .await?;
        info!(card_id = %card.id, name = %card.name, "card deleted");
        Ok(card)
    }

    async fn modify_card<F>(
        &self,
        card: &Card,
        operation: &'static str,
        change: F,
    ) -> Result<Card, AppError>
    where
        F: FnOnce(&mut Card),
    {
        let mut uow = self.repo.begin().await?;
        let result = update_card_row(&mut uow, card, change).await;
        self.finish(uow, result, operation).await
    }

    // ========================
    // Ledger operations
    // ========================

    /// Book a daily update: spend inferred from the reported balance, then
    /// the top-up with its commission and limit check.
    #[tracing::instrument(skip(self, actor, update), fields(user_id = %actor.user_id))]
    pub async fn apply_daily_update(
        &self,
        actor: &Actor,
        reference: &str,
        update: BalanceUpdate,
    ) -> Result<LedgerOutcome, AppError> {
        let card = self.resolve_card(actor, reference).await?;
        require_for_team(actor, Permission::UpdateBalances, card.team_id)?;

        let today = self.today();
        let date = update.date.unwrap_or(today);
        if date > today {
            return Err(AppError::InvalidInput(format!(
                "transaction date {} is in the future",
                date
            )));
        }

        let daily = DailyUpdate {
            reported_balance: update.reported_balance,
            topup_amount: update.topup_amount.unwrap_or(0),
            description: update.description,
        };
        let posting = self.posting(actor, date);
        let policy = self.config.commission_policy();

        let mut uow = self.repo.begin().await?;
        let result = book_daily_update(&mut uow, &card, &daily, policy, posting).await;
        let outcome = self.finish(uow, result, "apply_daily_update").await?;

        info!(
            card_id = %outcome.card.id,
            balance = outcome.card.balance,
            status = %outcome.card.status,
            entries = outcome.entries.len(),
            "daily update applied"
        );
        Ok(outcome)
    }

    /// Void a transaction and undo its effect on the card.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn cancel_transaction(
        &self,
        actor: &Actor,
        transaction_id: TransactionId,
    ) -> Result<CancellationOutcome, AppError> {
        let transaction = self
            .repo
            .get_transaction(transaction_id)
            .await?
            .filter(|t| !t.is_cancelled)
            .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;
        let card = self
            .repo
            .get_card(transaction.card_id)
            .await?
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| AppError::CardNotFound(transaction.card_id.to_string()))?;
        require_for_team(actor, Permission::CancelTransactions, card.team_id)?;

        let posting = self.posting(actor, self.today());
        let mut uow = self.repo.begin().await?;
        let result = book_cancellation(&mut uow, &card, transaction_id, posting).await;
        let outcome = self.finish(uow, result, "cancel_transaction").await?;

        info!(
            card_id = %outcome.card.id,
            balance = outcome.card.balance,
            amount = outcome.transaction.amount,
            "transaction cancelled"
        );
        Ok(outcome)
    }

    pub async fn get_transaction(
        &self,
        actor: &Actor,
        transaction_id: TransactionId,
    ) -> Result<CardTransaction, AppError> {
        let transaction = self
            .repo
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;
        let card = self
            .repo
            .get_card(transaction.card_id)
            .await?
            .ok_or_else(|| AppError::CardNotFound(transaction.card_id.to_string()))?;
        require_for_team(actor, Permission::ViewCards, card.team_id)?;
        Ok(transaction)
    }

    /// Transactions newest first, limited to the actor's team.
    pub async fn list_transactions(
        &self,
        actor: &Actor,
        filter: &TransactionFilter,
    ) -> Result<Vec<CardTransaction>, AppError> {
        require(actor, Permission::ViewCards)?;
        check_range(filter.from_date, filter.to_date)?;

        let card_id = match filter.card.as_deref() {
            Some(reference) => Some(self.resolve_card(actor, reference).await?.id),
            None => None,
        };
        let query = TransactionQuery {
            card_id,
            team_id: actor.team_scope(),
            from_date: filter.from_date,
            to_date: filter.to_date,
            include_cancelled: filter.include_cancelled,
            limit: filter.limit,
        };
        Ok(self.repo.list_transactions(&query).await?)
    }

    // ========================
    // Reports
    // ========================

    /// Top-up, spend and commission totals per card and per buyer, inclusive range.
    pub async fn period_report(
        &self,
        actor: &Actor,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PeriodReport, AppError> {
        require(actor, Permission::ViewReports)?;
        check_range(Some(from), Some(to))?;

        let rows = self
            .repo
            .sum_period_by_card(from, to, actor.team_scope())
            .await?;
        Ok(PeriodReport::from_aggregates(from, to, rows))
    }

    /// Verify the ledger: sequence continuity, balance chains, amount signs,
    /// and every card's stored counters against its transaction log.
    pub async fn check_integrity(&self, actor: &Actor) -> Result<IntegrityReport, AppError> {
        require(actor, Permission::AuditLedger)?;

        let stats = self.repo.get_integrity_stats().await?;
        let cards = self
            .repo
            .list_cards(&CardQuery {
                include_deleted: true,
                ..Default::default()
            })
            .await?;

        let mut drifts = Vec::new();
        for card in &cards {
            let transactions = self.repo.list_transactions_for_card(card.id).await?;
            if let Some(drift) = check_card(card, &transactions) {
                warn!(card_id = %card.id, name = %card.name, "stored aggregates drifted from ledger");
                drifts.push(drift);
            }
        }

        Ok(IntegrityReport {
            card_count: stats.card_count,
            transaction_count: stats.transaction_count,
            has_sequence_gaps: stats.has_sequence_gaps,
            broken_chain_entries: stats.broken_chain_entries,
            invalid_amounts: stats.invalid_amounts,
            drifts,
        })
    }

    /// Commit on success, roll back on failure. Storage failures are logged
    /// with their cause; the caller only sees the generic error.
    async fn finish<T>(
        &self,
        uow: UnitOfWork,
        result: Result<T, AppError>,
        operation: &'static str,
    ) -> Result<T, AppError> {
        match result {
            Ok(value) => match uow.commit().await {
                Ok(()) => Ok(value),
                Err(cause) => {
                    error!(operation, error = ?cause, "commit failed");
                    Err(AppError::Database(cause))
                }
            },
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    error!(operation, error = ?rollback_err, "rollback failed");
                }
                match &err {
                    AppError::Database(cause) => {
                        error!(operation, error = ?cause, "operation rolled back")
                    }
                    AppError::ConcurrentModification(card_id) => {
                        warn!(operation, card_id = %card_id, "version conflict, operation rolled back")
                    }
                    other => warn!(operation, error = %other, "operation rejected"),
                }
                Err(err)
            }
        }
    }
}

// ========================
// Unit-of-work steps
// ========================

/// Re-read the card inside the transaction and make sure nobody wrote it
/// since `expected` was loaded.
async fn load_for_update(uow: &mut UnitOfWork, expected: &Card) -> Result<Card, AppError> {
    let current = uow
        .get_card(expected.id)
        .await?
        .filter(|c| !c.is_deleted())
        .ok_or_else(|| AppError::CardNotFound(expected.id.to_string()))?;
    if current.version != expected.version {
        return Err(AppError::ConcurrentModification(expected.id));
    }
    Ok(current)
}

async fn store_card(uow: &mut UnitOfWork, card: &mut Card) -> Result<(), AppError> {
    if uow.update_card(card).await? {
        Ok(())
    } else {
        Err(AppError::ConcurrentModification(card.id))
    }
}

async fn insert_funded_card(
    uow: &mut UnitOfWork,
    plan: LedgerPlan,
) -> Result<LedgerOutcome, AppError> {
    let LedgerPlan { card, mut entries } = plan;
    uow.insert_card(&card).await?;
    for entry in &mut entries {
        uow.insert_transaction(entry).await?;
    }
    Ok(LedgerOutcome { card, entries })
}

async fn update_card_row<F>(uow: &mut UnitOfWork, card: &Card, change: F) -> Result<Card, AppError>
where
    F: FnOnce(&mut Card),
{
    let mut current = load_for_update(uow, card).await?;
    change(&mut current);
    store_card(uow, &mut current).await?;
    Ok(current)
}

async fn book_daily_update(
    uow: &mut UnitOfWork,
    card: &Card,
    update: &DailyUpdate,
    policy: CommissionPolicy,
    posting: Posting,
) -> Result<LedgerOutcome, AppError> {
    let current = load_for_update(uow, card).await?;
    let context = DayContext {
        commission_charged: uow.commission_charged(current.id).await?,
        topups_today: uow.sum_topups_on(current.id, posting.date).await?,
    };

    let LedgerPlan {
        card: mut updated,
        mut entries,
    } = plan_daily_update(&current, update, context, policy, posting)?;
    for entry in &mut entries {
        uow.insert_transaction(entry).await?;
    }
    store_card(uow, &mut updated).await?;
    Ok(LedgerOutcome {
        card: updated,
        entries,
    })
}

async fn book_cancellation(
    uow: &mut UnitOfWork,
    card: &Card,
    transaction_id: TransactionId,
    posting: Posting,
) -> Result<CancellationOutcome, AppError> {
    let current = load_for_update(uow, card).await?;
    let transaction = uow
        .get_transaction(transaction_id)
        .await?
        .filter(|t| !t.is_cancelled)
        .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;

    let CancellationPlan {
        card: mut updated,
        transaction,
    } = plan_cancellation(&current, &transaction, posting)?;
    if !uow.mark_cancelled(&transaction).await? {
        return Err(AppError::TransactionNotFound(transaction_id.to_string()));
    }
    store_card(uow, &mut updated).await?;
    Ok(CancellationOutcome {
        card: updated,
        transaction,
    })
}

// ========================
// Input checks
// ========================

fn require(actor: &Actor, permission: Permission) -> Result<(), AppError> {
    authorize(actor, permission).map_err(|err| denied(actor, permission, err))
}

fn require_for_team(actor: &Actor, permission: Permission, team_id: TeamId) -> Result<(), AppError> {
    authorize_for_team(actor, permission, team_id).map_err(|err| denied(actor, permission, err))
}

fn denied(actor: &Actor, permission: Permission, err: AuthzError) -> AppError {
    warn!(
        user_id = %actor.user_id,
        role = %actor.role,
        permission = permission.as_str(),
        reason = %err,
        "authorization denied"
    );
    err.into()
}

fn invalid_config(err: anyhow::Error) -> AppError {
    AppError::InvalidInput(format!("configuration: {:#}", err))
}

fn required_name<'a>(value: &'a str, field: &'static str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::MissingField(field))
    } else {
        Ok(trimmed)
    }
}

fn normalize_currency(code: &str) -> Result<String, AppError> {
    let code = code.trim().to_ascii_uppercase();
    if is_currency_code(&code) {
        Ok(code)
    } else {
        Err(AppError::InvalidInput(format!(
            "currency must be a three-letter code, got '{}'",
            code
        )))
    }
}

fn positive_limit(limit: Option<Cents>) -> Result<Option<Cents>, AppError> {
    match limit {
        Some(limit) if limit <= 0 => Err(AppError::InvalidAmount(format!(
            "top-up limit must be positive, got {}",
            format_cents(limit)
        ))),
        other => Ok(other),
    }
}

fn check_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), AppError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(AppError::InvalidInput(format!(
            "start date {} is after end date {}",
            from, to
        ))),
        _ => Ok(()),
    }
}
