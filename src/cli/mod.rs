use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{
    AppError, BalanceUpdate, CardFilter, CardService, CardView, ErrorKind, NewCard,
    TransactionFilter,
};
use crate::config::LedgerConfig;
use crate::domain::{
    Actor, CardStatus, CardTransaction, Cents, Role, TransactionId, format_cents, parse_cents,
};

/// cardledger - prepaid card ledger
#[derive(Parser)]
#[command(name = "cardledger")]
#[command(about = "Track prepaid card balances, top-ups, commissions and spend per team")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "CARDLEDGER_DB", default_value = "cardledger.db", global = true)]
    pub database: String,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Username to act as
    #[arg(short, long, env = "CARDLEDGER_USER", global = true)]
    pub user: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database and create its first admin
    Init {
        /// Username of the admin account
        #[arg(long)]
        admin: String,
    },

    /// Team management commands
    #[command(subcommand)]
    Team(TeamCommands),

    /// Buyer management commands
    #[command(subcommand)]
    Buyer(BuyerCommands),

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Card management commands
    #[command(subcommand)]
    Card(CardCommands),

    /// Apply a daily balance update to a card
    Update {
        /// Card name or id
        card: String,

        /// Balance reported by the issuer (e.g., "85.00")
        #[arg(short, long)]
        balance: Option<String>,

        /// Amount loaded onto the card (e.g., "100" or "100.00")
        #[arg(short, long)]
        topup: Option<String>,

        /// Posting date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Description of the entry
        #[arg(long)]
        description: Option<String>,
    },

    /// List transactions
    Transactions {
        /// Filter by card name or id
        #[arg(long)]
        card: Option<String>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<String>,

        /// Include cancelled transactions
        #[arg(short, long)]
        all: bool,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show detailed transaction information
    #[command(name = "show")]
    ShowTransaction {
        /// Transaction ID
        id: String,
    },

    /// Cancel a transaction and undo its effect on the card
    Cancel {
        /// Transaction ID
        id: String,
    },

    /// Top-ups, spend and commission per card and buyer over a period
    Report {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Output format: table, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, cards
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Filter from date (YYYY-MM-DD, transactions only)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD, transactions only)
        #[arg(long)]
        to_date: Option<String>,

        /// Include cancelled transactions and deleted cards
        #[arg(short, long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum TeamCommands {
    /// Create a new team
    Create { name: String },

    /// List teams
    List,
}

#[derive(Subcommand)]
pub enum BuyerCommands {
    /// Create a buyer in a team
    Create {
        name: String,

        /// Team name (defaults to your own team)
        #[arg(long)]
        team: Option<String>,
    },

    /// List buyers
    List {
        /// Team name
        #[arg(long)]
        team: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user account
    Create {
        username: String,

        /// Role: admin, manager, buyer
        #[arg(long)]
        role: String,

        /// Team name (required for managers and buyers)
        #[arg(long)]
        team: Option<String>,
    },

    /// List user accounts
    List,
}

#[derive(Subcommand)]
pub enum CardCommands {
    /// Create a new card and book its initial funding
    Create {
        name: String,

        /// Team name (defaults to your own team)
        #[arg(long)]
        team: Option<String>,

        /// Buyer name or id within the team
        #[arg(long)]
        buyer: Option<String>,

        /// Currency code (defaults to the configured currency)
        #[arg(long)]
        currency: Option<String>,

        /// Initial balance (e.g., "100.00")
        #[arg(short, long, default_value = "0")]
        balance: String,

        /// Commission for the initial funding (defaults to the configured fee)
        #[arg(long)]
        commission: Option<String>,

        /// Daily top-up limit
        #[arg(long)]
        limit: Option<String>,
    },

    /// List cards
    List {
        /// Team name
        #[arg(long)]
        team: Option<String>,

        /// Buyer name or id (needs a team)
        #[arg(long)]
        buyer: Option<String>,

        /// Only cards showing this status
        #[arg(long)]
        status: Option<String>,

        /// Include deleted cards
        #[arg(short, long)]
        all: bool,
    },

    /// Show card details
    Show {
        /// Card name or id
        card: String,
    },

    /// Change a card's status
    Status {
        /// Card name or id
        card: String,

        /// active, blocked, reissue, error, rebind, not_issued, not_spinning, limit_exceeded
        status: String,
    },

    /// Assign a card to a buyer (omit --buyer to unassign)
    Assign {
        /// Card name or id
        card: String,

        #[arg(long)]
        buyer: Option<String>,
    },

    /// Set a card's daily top-up limit (omit --amount to remove it)
    Limit {
        /// Card name or id
        card: String,

        #[arg(long)]
        amount: Option<String>,
    },

    /// Delete a card (its transactions are kept)
    Delete {
        /// Card name or id
        card: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => LedgerConfig::from_file(path)?,
            None => LedgerConfig::default(),
        };

        if let Commands::Init { admin } = &self.command {
            let service = CardService::init(&self.database, config).await?;
            let user = service.bootstrap_admin(admin).await?;
            println!("Database initialized: {}", self.database);
            println!("Admin user: {} ({})", user.username, user.id);
            return Ok(());
        }

        let service = CardService::connect(&self.database, config).await?;
        let username = self
            .user
            .as_deref()
            .context("No user given. Pass --user or set CARDLEDGER_USER")?;
        let actor = service.authenticate(username).await?;

        match self.command {
            Commands::Init { .. } => {}

            Commands::Team(cmd) => run_team_command(&service, &actor, cmd).await?,

            Commands::Buyer(cmd) => run_buyer_command(&service, &actor, cmd).await?,

            Commands::User(cmd) => run_user_command(&service, &actor, cmd).await?,

            Commands::Card(cmd) => run_card_command(&service, &actor, cmd).await?,

            Commands::Update {
                card,
                balance,
                topup,
                date,
                description,
            } => {
                let update = BalanceUpdate {
                    reported_balance: balance.as_deref().map(amount_arg).transpose()?,
                    topup_amount: topup.as_deref().map(amount_arg).transpose()?,
                    date: date.as_deref().map(date_arg).transpose()?,
                    description,
                };
                let outcome = service.apply_daily_update(&actor, &card, update).await?;

                if outcome.entries.is_empty() {
                    println!("No change booked for {}", outcome.card.name);
                }
                for entry in &outcome.entries {
                    println!(
                        "Recorded {} {} {} ({})",
                        entry_label(entry),
                        format_cents(entry.amount),
                        entry.currency,
                        entry.id
                    );
                }
                println!(
                    "{}: balance {} {}, status {}",
                    outcome.card.name,
                    format_cents(outcome.card.balance),
                    outcome.card.currency,
                    outcome.card.status
                );
            }

            Commands::Transactions {
                card,
                from_date,
                to_date,
                all,
                limit,
            } => {
                let filter = TransactionFilter {
                    card,
                    from_date: from_date.as_deref().map(date_arg).transpose()?,
                    to_date: to_date.as_deref().map(date_arg).transpose()?,
                    include_cancelled: all,
                    limit,
                };
                run_transactions_command(&service, &actor, &filter).await?;
            }

            Commands::ShowTransaction { id } => {
                let transaction = service.get_transaction(&actor, transaction_arg(&id)?).await?;
                print_transaction(&transaction);
            }

            Commands::Cancel { id } => {
                let outcome = service
                    .cancel_transaction(&actor, transaction_arg(&id)?)
                    .await?;
                println!(
                    "Cancelled {} {} on {}",
                    entry_label(&outcome.transaction),
                    format_cents(outcome.transaction.amount),
                    outcome.card.name
                );
                println!(
                    "{}: balance {} {}",
                    outcome.card.name,
                    format_cents(outcome.card.balance),
                    outcome.card.currency
                );
            }

            Commands::Report { from, to, format } => {
                run_report_command(&service, &actor, date_arg(&from)?, date_arg(&to)?, &format)
                    .await?;
            }

            Commands::Check => run_check_command(&service, &actor).await?,

            Commands::Export {
                export_type,
                output,
                format,
                from_date,
                to_date,
                all,
            } => {
                let transactions = TransactionFilter {
                    from_date: from_date.as_deref().map(date_arg).transpose()?,
                    to_date: to_date.as_deref().map(date_arg).transpose()?,
                    include_cancelled: all,
                    ..Default::default()
                };
                run_export_command(
                    &service,
                    &actor,
                    &export_type,
                    output.as_deref(),
                    &format,
                    &transactions,
                    all,
                )
                .await?;
            }
        }

        Ok(())
    }
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AppError>().map(AppError::kind) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::Unauthenticated) => 3,
        Some(ErrorKind::Forbidden) => 4,
        Some(ErrorKind::NotFound) => 5,
        Some(ErrorKind::Conflict) => 6,
        Some(ErrorKind::Internal) => 7,
        None => 1,
    }
}

/// Message shown to the user. Internal errors never show their cause.
pub fn error_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<AppError>() {
        Some(app_err) if app_err.kind() == ErrorKind::Internal => app_err.to_string(),
        _ => format!("{:#}", err),
    }
}

async fn run_team_command(service: &CardService, actor: &Actor, cmd: TeamCommands) -> Result<()> {
    match cmd {
        TeamCommands::Create { name } => {
            let team = service.create_team(actor, &name).await?;
            println!("Created team: {} ({})", team.name, team.id);
        }
        TeamCommands::List => {
            let teams = service.list_teams(actor).await?;
            if teams.is_empty() {
                println!("No teams found.");
            } else {
                println!("{:<24} {:<36}", "TEAM", "ID");
                println!("{}", "-".repeat(61));
                for team in teams {
                    println!("{:<24} {:<36}", truncate(&team.name, 24), team.id);
                }
            }
        }
    }
    Ok(())
}

async fn run_buyer_command(
    service: &CardService,
    actor: &Actor,
    cmd: BuyerCommands,
) -> Result<()> {
    match cmd {
        BuyerCommands::Create { name, team } => {
            let buyer = service.create_buyer(actor, team.as_deref(), &name).await?;
            println!("Created buyer: {} ({})", buyer.name, buyer.id);
        }
        BuyerCommands::List { team } => {
            let buyers = service.list_buyers(actor, team.as_deref()).await?;
            if buyers.is_empty() {
                println!("No buyers found.");
            } else {
                println!("{:<24} {:<36}", "BUYER", "ID");
                println!("{}", "-".repeat(61));
                for buyer in buyers {
                    println!("{:<24} {:<36}", truncate(&buyer.name, 24), buyer.id);
                }
            }
        }
    }
    Ok(())
}

async fn run_user_command(service: &CardService, actor: &Actor, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            username,
            role,
            team,
        } => {
            let role: Role = role.parse().map_err(AppError::InvalidInput)?;
            let user = service
                .create_user(actor, &username, role, team.as_deref())
                .await?;
            println!("Created user: {} [{}] ({})", user.username, user.role, user.id);
        }
        UserCommands::List => {
            let users = service.list_users(actor).await?;
            println!("{:<20} {:<8} {:<36}", "USER", "ROLE", "TEAM");
            println!("{}", "-".repeat(66));
            for user in users {
                println!(
                    "{:<20} {:<8} {:<36}",
                    truncate(&user.username, 20),
                    user.role.as_str(),
                    user.team_id.map(|id| id.to_string()).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

async fn run_card_command(service: &CardService, actor: &Actor, cmd: CardCommands) -> Result<()> {
    match cmd {
        CardCommands::Create {
            name,
            team,
            buyer,
            currency,
            balance,
            commission,
            limit,
        } => {
            let new_card = NewCard {
                name,
                team,
                buyer,
                currency,
                initial_balance: amount_arg(&balance)?,
                commission: commission.as_deref().map(amount_arg).transpose()?,
                topup_limit: limit.as_deref().map(amount_arg).transpose()?,
            };
            let outcome = service.create_card(actor, new_card).await?;
            println!(
                "Created card: {} ({}) balance {} {}",
                outcome.card.name,
                outcome.card.id,
                format_cents(outcome.card.balance),
                outcome.card.currency
            );
            for entry in &outcome.entries {
                println!("  {} {}", entry_label(entry), format_cents(entry.amount));
            }
        }

        CardCommands::List {
            team,
            buyer,
            status,
            all,
        } => {
            let filter = CardFilter {
                team,
                buyer,
                status: status.as_deref().map(status_arg).transpose()?,
                include_deleted: all,
            };
            let cards = service.list_cards(actor, &filter).await?;
            print_card_table(&cards);
        }

        CardCommands::Show { card } => {
            let view = service.get_card(actor, &card).await?;
            print_card(&view);
        }

        CardCommands::Status { card, status } => {
            let card = service.set_status(actor, &card, status_arg(&status)?).await?;
            println!("{}: status {}", card.name, card.status);
        }

        CardCommands::Assign { card, buyer } => {
            let card = service.assign_buyer(actor, &card, buyer.as_deref()).await?;
            match buyer {
                Some(buyer) => println!("{}: assigned to {}", card.name, buyer),
                None => println!("{}: unassigned", card.name),
            }
        }

        CardCommands::Limit { card, amount } => {
            let limit = amount.as_deref().map(amount_arg).transpose()?;
            let card = service.set_topup_limit(actor, &card, limit).await?;
            match card.topup_limit {
                Some(limit) => println!("{}: daily top-up limit {}", card.name, format_cents(limit)),
                None => println!("{}: no daily top-up limit", card.name),
            }
        }

        CardCommands::Delete { card } => {
            let card = service.delete_card(actor, &card).await?;
            println!("Deleted card: {} ({})", card.name, card.id);
        }
    }
    Ok(())
}

async fn run_transactions_command(
    service: &CardService,
    actor: &Actor,
    filter: &TransactionFilter,
) -> Result<()> {
    let transactions = service.list_transactions(actor, filter).await?;
    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<12} {:<11} {:>10} {:>10} {:<36} DESCRIPTION",
        "DATE", "TYPE", "AMOUNT", "BALANCE", "ID"
    );
    println!("{}", "-".repeat(100));

    // Oldest first on screen
    for t in transactions.iter().rev() {
        let mut description = t.description.clone().unwrap_or_default();
        if t.is_cancelled {
            description = format!("[cancelled] {}", description);
        }
        println!(
            "{:<12} {:<11} {:>10} {:>10} {:<36} {}",
            t.transaction_date.to_string(),
            entry_label(t),
            format_cents(t.amount),
            format_cents(t.balance_after),
            t.id,
            truncate(&description, 30)
        );
    }
    Ok(())
}

async fn run_report_command(
    service: &CardService,
    actor: &Actor,
    from: NaiveDate,
    to: NaiveDate,
    format: &str,
) -> Result<()> {
    let report = service.period_report(actor, from, to).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "table" => {
            println!("Period {} .. {}\n", report.from_date, report.to_date);
            if report.cards.is_empty() {
                println!("No activity in this period.");
                return Ok(());
            }

            println!(
                "{:<20} {:<16} {:>12} {:>12} {:>12}",
                "CARD", "BUYER", "TOP-UP", "SPENT", "COMMISSION"
            );
            println!("{}", "-".repeat(76));
            for card in &report.cards {
                println!(
                    "{:<20} {:<16} {:>12} {:>12} {:>12}",
                    truncate(&card.card_name, 20),
                    truncate(card.buyer_name.as_deref().unwrap_or("-"), 16),
                    format_cents(card.topup),
                    format_cents(card.expense),
                    format_cents(card.commission)
                );
            }

            println!();
            println!(
                "{:<20} {:>6} {:>12} {:>12} {:>12}",
                "BUYER", "CARDS", "TOP-UP", "SPENT", "COMMISSION"
            );
            println!("{}", "-".repeat(66));
            for buyer in &report.buyers {
                println!(
                    "{:<20} {:>6} {:>12} {:>12} {:>12}",
                    truncate(buyer.buyer_name.as_deref().unwrap_or("(unassigned)"), 20),
                    buyer.card_count,
                    format_cents(buyer.topup),
                    format_cents(buyer.expense),
                    format_cents(buyer.commission)
                );
            }
            println!("{}", "-".repeat(66));
            println!(
                "{:<20} {:>6} {:>12} {:>12} {:>12}",
                "Total",
                report.cards.len(),
                format_cents(report.total_topup),
                format_cents(report.total_expense),
                format_cents(report.total_commission)
            );
        }
        other => {
            return Err(AppError::InvalidInput(format!(
                "Invalid report format '{}'. Valid formats: table, json",
                other
            ))
            .into());
        }
    }
    Ok(())
}

async fn run_check_command(service: &CardService, actor: &Actor) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity(actor).await?;

    println!("Cards:        {}", report.card_count);
    println!("Transactions: {}", report.transaction_count);
    println!();

    let mut issues = Vec::new();
    if report.has_sequence_gaps {
        issues.push("Transaction sequence has gaps".to_string());
    }
    if report.broken_chain_entries > 0 {
        issues.push(format!(
            "{} entries whose balance_after does not follow from balance_before",
            report.broken_chain_entries
        ));
    }
    if report.invalid_amounts > 0 {
        issues.push(format!(
            "{} entries whose sign disagrees with their type",
            report.invalid_amounts
        ));
    }
    for drift in &report.drifts {
        issues.push(format!(
            "{}: stored balance {} / top-up {} / spent {} / commission {}, ledger says {} / {} / {} / {}",
            drift.card_name,
            format_cents(drift.stored.balance),
            format_cents(drift.stored.total_top_up),
            format_cents(drift.stored.total_spent_calculated),
            format_cents(drift.stored.commission_paid),
            format_cents(drift.derived.balance),
            format_cents(drift.derived.total_top_up),
            format_cents(drift.derived.total_spent_calculated),
            format_cents(drift.derived.commission_paid),
        ));
    }

    if report.is_ok() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    service: &CardService,
    actor: &Actor,
    export_type: &str,
    output: Option<&str>,
    format: &str,
    transactions: &TransactionFilter,
    include_deleted: bool,
) -> Result<()> {
    use crate::io::{ExportFormat, Exporter};
    use std::fs::File;
    use std::io::{Write, stdout};

    let format: ExportFormat = format.parse().map_err(AppError::InvalidInput)?;
    let exporter = Exporter::new(service, actor);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter
                .export_transactions(writer, transactions, format)
                .await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "cards" => {
            let filter = CardFilter {
                include_deleted,
                ..Default::default()
            };
            let count = exporter.export_cards(writer, &filter, format).await?;
            if output.is_some() {
                eprintln!("Exported {} cards", count);
            }
        }
        _ => {
            return Err(AppError::InvalidInput(format!(
                "Invalid export type '{}'. Valid types: transactions, cards",
                export_type
            ))
            .into());
        }
    }

    Ok(())
}

fn print_card_table(cards: &[CardView]) {
    if cards.is_empty() {
        println!("No cards found.");
        return;
    }

    println!(
        "{:<20} {:<14} {:<14} {:>12} {:>12} {:<8} {:<14}",
        "CARD", "TEAM", "BUYER", "BALANCE", "SPENT", "CURRENCY", "STATUS"
    );
    println!("{}", "-".repeat(100));
    for view in cards {
        let card = &view.card;
        let status = if card.is_deleted() {
            "deleted".to_string()
        } else {
            view.display_status.to_string()
        };
        println!(
            "{:<20} {:<14} {:<14} {:>12} {:>12} {:<8} {:<14}",
            truncate(&card.name, 20),
            truncate(&view.team_name, 14),
            truncate(view.buyer_name.as_deref().unwrap_or("-"), 14),
            format_cents(card.balance),
            format_cents(card.total_spent_calculated),
            card.currency,
            status
        );
    }
}

fn print_card(view: &CardView) {
    let card = &view.card;
    println!("Card: {}", card.name);
    println!("  ID:              {}", card.id);
    println!("  Team:            {}", view.team_name);
    println!(
        "  Buyer:           {}",
        view.buyer_name.as_deref().unwrap_or("-")
    );
    println!(
        "  Balance:         {} {}",
        format_cents(card.balance),
        card.currency
    );
    println!("  Reported:        {}", format_cents(card.remaining_balance));
    println!("  Topped up:       {}", format_cents(card.total_top_up));
    println!("  Spent:           {}", format_cents(card.total_spent_calculated));
    println!("  Commission paid: {}", format_cents(card.commission_paid));
    match card.topup_limit {
        Some(limit) => println!("  Daily limit:     {}", format_cents(limit)),
        None => println!("  Daily limit:     none"),
    }
    if view.display_status != card.status {
        println!("  Status:          {} (stored: {})", view.display_status, card.status);
    } else {
        println!("  Status:          {}", card.status);
    }
    if let Some(last) = card.last_transaction_date {
        println!("  Last activity:   {}", last);
    }
    println!(
        "  Created:         {}",
        card.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(deleted_at) = card.lifecycle.deleted_at() {
        println!(
            "  Deleted:         {}",
            deleted_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_transaction(t: &CardTransaction) {
    println!("Transaction: {}", t.id);
    println!("  Sequence:    {}", t.sequence);
    println!("  Card:        {}", t.card_id);
    println!("  Date:        {}", t.transaction_date);
    println!("  Type:        {}", entry_label(t));
    println!("  Amount:      {} {}", format_cents(t.amount), t.currency);
    println!(
        "  Balance:     {} -> {}",
        format_cents(t.balance_before),
        format_cents(t.balance_after)
    );
    if let Some(desc) = &t.description {
        println!("  Description: {}", desc);
    }
    println!(
        "  Recorded at: {}",
        t.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(cancelled_at) = t.cancelled_at {
        println!();
        println!(
            "  Cancelled at {}",
            cancelled_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn entry_label(t: &CardTransaction) -> &'static str {
    if t.is_commission() {
        "commission"
    } else {
        t.transaction_type.as_str()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn amount_arg(value: &str) -> Result<Cents, AppError> {
    parse_cents(value).map_err(|e| AppError::InvalidAmount(e.to_string()))
}

fn date_arg(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::InvalidInput(format!("Invalid date '{}'. Use YYYY-MM-DD", value))
    })
}

fn status_arg(value: &str) -> Result<CardStatus, AppError> {
    value
        .parse::<CardStatus>()
        .map_err(|e| AppError::InvalidStatus(e.to_string()))
}

fn transaction_arg(value: &str) -> Result<TransactionId, AppError> {
    Uuid::parse_str(value.trim()).map_err(|_| {
        AppError::InvalidInput(format!(
            "Invalid transaction ID '{}' (expected UUID)",
            value
        ))
    })
}
