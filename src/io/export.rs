use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::{CardFilter, CardService, CardView, TransactionFilter};
use crate::domain::{Actor, CardId, CardTransaction};

/// Output format of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(format!("Invalid export format '{}'. Valid formats: csv, json", s)),
        }
    }
}

/// Envelope written by JSON exports
#[derive(Debug, Serialize)]
struct JsonExport<'a, T: Serialize> {
    version: &'static str,
    exported_at: DateTime<Utc>,
    count: usize,
    items: &'a [T],
}

/// Exports what the actor is allowed to see.
pub struct Exporter<'a> {
    service: &'a CardService,
    actor: &'a Actor,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a CardService, actor: &'a Actor) -> Self {
        Self { service, actor }
    }

    /// Export transactions. Returns the number of rows written.
    pub async fn export_transactions<W: Write>(
        &self,
        writer: W,
        filter: &TransactionFilter,
        format: ExportFormat,
    ) -> Result<usize> {
        let transactions = self.service.list_transactions(self.actor, filter).await?;
        match format {
            ExportFormat::Csv => self.write_transactions_csv(writer, &transactions).await,
            ExportFormat::Json => write_json(writer, &transactions),
        }
    }

    /// Export cards with their display status. Returns the number of rows written.
    pub async fn export_cards<W: Write>(
        &self,
        writer: W,
        filter: &CardFilter,
        format: ExportFormat,
    ) -> Result<usize> {
        let cards = self.service.list_cards(self.actor, filter).await?;
        match format {
            ExportFormat::Csv => write_cards_csv(writer, &cards),
            ExportFormat::Json => write_json(writer, &cards),
        }
    }

    async fn write_transactions_csv<W: Write>(
        &self,
        writer: W,
        transactions: &[CardTransaction],
    ) -> Result<usize> {
        // Deleted cards still own history, so their names are needed too.
        let card_names: HashMap<CardId, String> = self
            .service
            .list_cards(
                self.actor,
                &CardFilter {
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .await?
            .into_iter()
            .map(|view| (view.card.id, view.card.name))
            .collect();

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "id",
            "sequence",
            "date",
            "card",
            "type",
            "category",
            "amount_cents",
            "currency",
            "balance_before",
            "balance_after",
            "description",
            "cancelled",
            "created_at",
        ])?;

        for t in transactions {
            csv_writer.write_record([
                t.id.to_string(),
                t.sequence.to_string(),
                t.transaction_date.to_string(),
                card_names
                    .get(&t.card_id)
                    .cloned()
                    .unwrap_or_else(|| t.card_id.to_string()),
                t.transaction_type.as_str().to_string(),
                t.category.as_str().to_string(),
                t.amount.to_string(),
                t.currency.clone(),
                t.balance_before.to_string(),
                t.balance_after.to_string(),
                t.description.clone().unwrap_or_default(),
                t.is_cancelled.to_string(),
                t.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }
}

fn write_cards_csv<W: Write>(writer: W, cards: &[CardView]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "id",
        "name",
        "team",
        "buyer",
        "currency",
        "balance",
        "total_top_up",
        "total_spent",
        "commission_paid",
        "topup_limit",
        "status",
        "last_transaction_date",
        "deleted_at",
    ])?;

    for view in cards {
        let card = &view.card;
        csv_writer.write_record([
            card.id.to_string(),
            card.name.clone(),
            view.team_name.clone(),
            view.buyer_name.clone().unwrap_or_default(),
            card.currency.clone(),
            card.balance.to_string(),
            card.total_top_up.to_string(),
            card.total_spent_calculated.to_string(),
            card.commission_paid.to_string(),
            card.topup_limit.map(|l| l.to_string()).unwrap_or_default(),
            view.display_status.as_str().to_string(),
            card.last_transaction_date
                .map(|d| d.to_string())
                .unwrap_or_default(),
            card.lifecycle
                .deleted_at()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(cards.len())
}

fn write_json<W: Write, T: Serialize>(mut writer: W, items: &[T]) -> Result<usize> {
    let export = JsonExport {
        version: env!("CARGO_PKG_VERSION"),
        exported_at: Utc::now(),
        count: items.len(),
        items,
    };
    serde_json::to_writer_pretty(&mut writer, &export)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(items.len())
}
