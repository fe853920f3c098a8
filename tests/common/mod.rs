// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use cardledger::application::{CardService, NewCard};
use cardledger::config::LedgerConfig;
use cardledger::domain::{Actor, Cents, FixedClock, Role};
use chrono::{DateTime, NaiveDate, Utc};
use tempfile::TempDir;

/// 2024-05-10 12:00 in the business calendar (UTC+3).
pub const NOW: &str = "2024-05-10T09:00:00Z";

/// Helper to create a test service with a temporary database and a fixed clock
pub async fn test_service() -> Result<(CardService, TempDir)> {
    test_service_with(LedgerConfig::default()).await
}

pub async fn test_service_with(config: LedgerConfig) -> Result<(CardService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = CardService::init(db_path.to_str().unwrap(), config)
        .await?
        .with_clock(Arc::new(FixedClock(instant(NOW))));
    Ok((service, temp_dir))
}

/// Same database file, different clock.
pub async fn reopen_at(dir: &TempDir, now: &str) -> Result<CardService> {
    let db_path = dir.path().join("test.db");
    let service = CardService::connect(db_path.to_str().unwrap(), LedgerConfig::default())
        .await?
        .with_clock(Arc::new(FixedClock(instant(now))));
    Ok(service)
}

pub fn database_url(dir: &TempDir) -> String {
    format!("sqlite:{}", dir.path().join("test.db").display())
}

pub fn instant(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Test fixture: two teams with their staff.
///
/// Alpha has manager `maria`, buyer login `bob` and buyer entity `bob`.
/// Bravo has manager `oscar`.
pub struct Org {
    pub admin: Actor,
    pub manager: Actor,
    pub buyer: Actor,
    pub other_manager: Actor,
}

impl Org {
    pub async fn create(service: &CardService) -> Result<Self> {
        let admin = service.bootstrap_admin("root").await?.actor();
        service.create_team(&admin, "Alpha").await?;
        service.create_team(&admin, "Bravo").await?;

        let manager = service
            .create_user(&admin, "maria", Role::Manager, Some("Alpha"))
            .await?
            .actor();
        let buyer = service
            .create_user(&admin, "bob", Role::Buyer, Some("Alpha"))
            .await?
            .actor();
        let other_manager = service
            .create_user(&admin, "oscar", Role::Manager, Some("Bravo"))
            .await?
            .actor();

        service.create_buyer(&manager, None, "bob").await?;

        Ok(Self {
            admin,
            manager,
            buyer,
            other_manager,
        })
    }
}

/// A card in team Alpha.
pub fn alpha_card(name: &str, initial_balance: Cents) -> NewCard {
    NewCard {
        name: name.to_string(),
        team: Some("Alpha".to_string()),
        initial_balance,
        ..Default::default()
    }
}
