mod common;

use anyhow::Result;
use cardledger::application::{AppError, BalanceUpdate, NewCard, TransactionFilter};
use cardledger::config::LedgerConfig;
use cardledger::domain::{CardStatus, TransactionCategory, TransactionType, parse_cents};
use common::{Org, alpha_card, date, test_service, test_service_with};

fn topup(amount: i64) -> BalanceUpdate {
    BalanceUpdate {
        topup_amount: Some(amount),
        ..Default::default()
    }
}

fn reported(balance: i64) -> BalanceUpdate {
    BalanceUpdate {
        reported_balance: Some(balance),
        ..Default::default()
    }
}

fn no_commission() -> LedgerConfig {
    LedgerConfig {
        commission_cents: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_initial_funding_books_topup_and_commission() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;

    let outcome = service
        .create_card(&org.manager, alpha_card("FB-01", 10000))
        .await?;

    assert_eq!(outcome.card.balance, 8500);
    assert_eq!(outcome.card.remaining_balance, 8500);
    assert_eq!(outcome.card.total_top_up, 10000);
    assert_eq!(outcome.card.commission_paid, 1500);
    assert_eq!(outcome.card.total_spent_calculated, 0);

    let amounts: Vec<i64> = outcome.entries.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![10000, -1500]);
    assert_eq!(outcome.entries[1].category, TransactionCategory::Commission);
    assert_eq!(outcome.entries[1].balance_before, 10000);
    assert_eq!(outcome.entries[1].balance_after, 8500);
    assert!(outcome.entries[0].sequence < outcome.entries[1].sequence);

    // Persisted together with the card
    let stored = service.get_card(&org.manager, "FB-01").await?;
    assert_eq!(stored.card.balance, 8500);
    let log = service
        .list_transactions(
            &org.manager,
            &TransactionFilter {
                card: Some("FB-01".into()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(log.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_initial_funding_without_commission_books_one_entry() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;

    let outcome = service
        .create_card(
            &org.manager,
            NewCard {
                commission: Some(0),
                ..alpha_card("FB-02", 10000)
            },
        )
        .await?;

    assert_eq!(outcome.card.balance, 10000);
    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.entries[0].amount, 10000);
    Ok(())
}

#[tokio::test]
async fn test_zero_funding_books_nothing() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;

    let outcome = service.create_card(&org.manager, alpha_card("FB-03", 0)).await?;
    assert!(outcome.entries.is_empty());
    assert_eq!(outcome.card.balance, 0);
    assert_eq!(outcome.card.last_transaction_date, None);
    Ok(())
}

#[tokio::test]
async fn test_first_topup_charges_commission_once() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 0)).await?;

    let first = service
        .apply_daily_update(&org.buyer, "FB-01", topup(10000))
        .await?;
    assert_eq!(first.card.balance, 8500);
    let amounts: Vec<i64> = first.entries.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![10000, -1500]);
    assert_eq!(first.entries[0].transaction_date, date("2024-05-10"));

    let second = service
        .apply_daily_update(&org.buyer, "FB-01", topup(5000))
        .await?;
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.card.balance, 13500);
    assert_eq!(second.card.total_top_up, 15000);
    assert_eq!(second.card.commission_paid, 1500);
    Ok(())
}

#[tokio::test]
async fn test_reported_balance_infers_spend() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 50000)).await?;

    let outcome = service
        .apply_daily_update(&org.buyer, "FB-01", reported(30000))
        .await?;

    assert_eq!(outcome.card.balance, 30000);
    assert_eq!(outcome.card.remaining_balance, 30000);
    assert_eq!(outcome.card.total_spent_calculated, 20000);
    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.entries[0].amount, -20000);
    assert_eq!(outcome.entries[0].transaction_type, TransactionType::Expense);
    Ok(())
}

#[tokio::test]
async fn test_unchanged_reported_balance_books_nothing() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 50000)).await?;

    let outcome = service
        .apply_daily_update(&org.buyer, "FB-01", reported(50000))
        .await?;
    assert!(outcome.entries.is_empty());
    assert_eq!(outcome.card.total_spent_calculated, 0);
    Ok(())
}

#[tokio::test]
async fn test_spend_and_topup_in_one_update() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 50000)).await?;

    let outcome = service
        .apply_daily_update(
            &org.buyer,
            "FB-01",
            BalanceUpdate {
                reported_balance: Some(30000),
                topup_amount: Some(10000),
                ..Default::default()
            },
        )
        .await?;

    let amounts: Vec<i64> = outcome.entries.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![-20000, 10000]);
    assert_eq!(outcome.card.balance, 40000);
    assert_eq!(outcome.card.total_spent_calculated, 20000);
    assert_eq!(outcome.card.total_top_up, 60000);
    Ok(())
}

#[tokio::test]
async fn test_daily_limit_moves_card_to_limit_exceeded() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service
        .create_card(
            &org.manager,
            NewCard {
                topup_limit: Some(800000),
                ..alpha_card("FB-01", 0)
            },
        )
        .await?;

    let first = service
        .apply_daily_update(&org.buyer, "FB-01", topup(790000))
        .await?;
    assert_eq!(first.card.status, CardStatus::Active);

    let second = service
        .apply_daily_update(&org.buyer, "FB-01", topup(20000))
        .await?;
    assert_eq!(second.card.status, CardStatus::LimitExceeded);
    Ok(())
}

#[tokio::test]
async fn test_daily_limit_counts_only_the_posting_date() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service
        .create_card(
            &org.manager,
            NewCard {
                topup_limit: Some(800000),
                ..alpha_card("FB-01", 0)
            },
        )
        .await?;

    service
        .apply_daily_update(
            &org.buyer,
            "FB-01",
            BalanceUpdate {
                topup_amount: Some(790000),
                date: Some(date("2024-05-09")),
                ..Default::default()
            },
        )
        .await?;
    let today = service
        .apply_daily_update(&org.buyer, "FB-01", topup(20000))
        .await?;
    assert_eq!(today.card.status, CardStatus::Active);
    Ok(())
}

#[tokio::test]
async fn test_limit_does_not_override_other_statuses() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service
        .create_card(
            &org.manager,
            NewCard {
                topup_limit: Some(1000),
                ..alpha_card("FB-01", 0)
            },
        )
        .await?;
    service
        .set_status(&org.manager, "FB-01", CardStatus::Rebind)
        .await?;

    let outcome = service
        .apply_daily_update(&org.buyer, "FB-01", topup(5000))
        .await?;
    assert_eq!(outcome.card.status, CardStatus::Rebind);
    Ok(())
}

#[tokio::test]
async fn test_cancel_topup_reverses_counters() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 70000)).await?;
    let topped = service
        .apply_daily_update(&org.buyer, "FB-01", topup(30000))
        .await?;
    assert_eq!(topped.card.balance, 100000);
    assert_eq!(topped.card.total_top_up, 100000);

    let outcome = service
        .cancel_transaction(&org.manager, topped.entries[0].id)
        .await?;

    assert_eq!(outcome.card.balance, 70000);
    assert_eq!(outcome.card.total_top_up, 70000);
    assert!(outcome.transaction.is_cancelled);
    assert_eq!(outcome.transaction.cancelled_by, Some(org.manager.user_id));

    let stored = service
        .get_transaction(&org.manager, topped.entries[0].id)
        .await?;
    assert!(stored.is_cancelled);
    assert!(stored.cancelled_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_cancel_twice_is_not_found() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 50000)).await?;
    let spend = service
        .apply_daily_update(&org.buyer, "FB-01", reported(20000))
        .await?;

    service
        .cancel_transaction(&org.manager, spend.entries[0].id)
        .await?;
    let again = service
        .cancel_transaction(&org.manager, spend.entries[0].id)
        .await;
    assert!(matches!(again, Err(AppError::TransactionNotFound(_))));

    // Reversed exactly once
    let card = service.get_card(&org.manager, "FB-01").await?.card;
    assert_eq!(card.balance, created.card.balance);
    assert_eq!(card.total_spent_calculated, 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_commission_restores_commission_paid() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;
    let commission = created.entries[1].clone();

    let outcome = service.cancel_transaction(&org.admin, commission.id).await?;
    assert_eq!(outcome.card.balance, 10000);
    assert_eq!(outcome.card.commission_paid, 0);
    assert_eq!(outcome.card.total_spent_calculated, 0);

    // With the commission voided the next top-up is charged again
    let next = service
        .apply_daily_update(&org.buyer, "FB-01", topup(5000))
        .await?;
    assert_eq!(next.entries.len(), 2);
    assert_eq!(next.card.commission_paid, 1500);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_matches_rederived_aggregates() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 20000)).await?;
    let spend = service
        .apply_daily_update(&org.buyer, "FB-01", reported(12000))
        .await?;
    service
        .apply_daily_update(&org.buyer, "FB-01", topup(4000))
        .await?;
    service
        .cancel_transaction(&org.manager, spend.entries[0].id)
        .await?;

    let report = service.check_integrity(&org.admin).await?;
    assert!(report.drifts.is_empty(), "drifts: {:?}", report.drifts);
    assert!(report.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_balance_equals_funding_plus_topups_minus_expenses() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 30000)).await?;

    for update in [reported(25000), topup(10000), reported(31000), topup(2500)] {
        service.apply_daily_update(&org.buyer, "FB-01", update).await?;
    }

    let card = service.get_card(&org.manager, "FB-01").await?.card;
    assert_eq!(
        card.balance,
        card.total_top_up - card.total_spent_calculated - card.commission_paid
    );
    assert_eq!(card.balance, 33500);
    Ok(())
}

#[tokio::test]
async fn test_invalid_updates_are_rejected_without_mutation() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let empty = service
        .apply_daily_update(&org.buyer, "FB-01", BalanceUpdate::default())
        .await;
    assert!(matches!(empty, Err(AppError::MissingField(_))));

    let negative = service
        .apply_daily_update(&org.buyer, "FB-01", topup(-100))
        .await;
    assert!(matches!(negative, Err(AppError::InvalidAmount(_))));

    let future = service
        .apply_daily_update(
            &org.buyer,
            "FB-01",
            BalanceUpdate {
                topup_amount: Some(100),
                date: Some(date("2024-05-11")),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(future, Err(AppError::InvalidInput(_))));

    let card = service.get_card(&org.manager, "FB-01").await?.card;
    assert_eq!(card.balance, 8500);
    assert_eq!(card.version, 0);
    Ok(())
}

#[tokio::test]
async fn test_reported_balance_above_tracked_is_flagged_by_check() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let outcome = service
        .apply_daily_update(&org.buyer, "FB-01", reported(12000))
        .await?;
    assert!(outcome.entries.is_empty());
    assert_eq!(outcome.card.balance, 12000);

    let report = service.check_integrity(&org.admin).await?;
    assert_eq!(report.drifts.len(), 1);
    assert_eq!(report.drifts[0].stored.balance, 12000);
    assert_eq!(report.drifts[0].derived.balance, 10000);
    Ok(())
}

#[tokio::test]
async fn test_commission_above_initial_balance_passes_check() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 1000)).await?;
    assert_eq!(created.card.balance, 0);
    assert_eq!(created.card.commission_paid, 1500);

    let report = service.check_integrity(&org.admin).await?;
    assert!(report.is_ok(), "unexpected findings: {:?}", report);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_topup_after_full_spend_passes_check() -> Result<()> {
    let (service, _dir) = test_service_with(no_commission()).await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;
    service
        .apply_daily_update(&org.buyer, "FB-01", reported(0))
        .await?;

    let outcome = service
        .cancel_transaction(&org.manager, created.entries[0].id)
        .await?;
    assert_eq!(outcome.card.balance, 0);
    assert_eq!(outcome.card.total_top_up, 0);

    let report = service.check_integrity(&org.admin).await?;
    assert!(report.is_ok(), "unexpected findings: {:?}", report);
    Ok(())
}

#[tokio::test]
async fn test_oversized_topup_is_rejected() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let huge = parse_cents("92233720368547758.00")?;
    let result = service
        .apply_daily_update(&org.buyer, "FB-01", topup(huge))
        .await;
    assert!(matches!(result, Err(AppError::InvalidAmount(_))));

    let card = service.get_card(&org.manager, "FB-01").await?.card;
    assert_eq!(card.balance, 8500);
    assert_eq!(card.version, 0);
    Ok(())
}
