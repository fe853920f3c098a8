mod common;

use anyhow::Result;
use cardledger::application::BalanceUpdate;
use cardledger::domain::CardStatus;
use cardledger::storage::Repository;
use common::{Org, alpha_card, database_url, test_service};

#[tokio::test]
async fn test_stale_card_write_is_refused() -> Result<()> {
    let (service, dir) = test_service().await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let repo = Repository::connect(&database_url(&dir)).await?;
    let snapshot = repo.get_card(created.card.id).await?.unwrap();
    assert_eq!(snapshot.version, 0);

    let mut first = snapshot.clone();
    first.balance = 9000;
    let mut uow = repo.begin().await?;
    assert!(uow.update_card(&mut first).await?);
    uow.commit().await?;
    assert_eq!(first.version, 1);

    // A second writer still holding version 0 loses
    let mut second = snapshot.clone();
    second.balance = 1;
    let mut uow = repo.begin().await?;
    assert!(!uow.update_card(&mut second).await?);
    uow.rollback().await?;

    let stored = repo.get_card(created.card.id).await?.unwrap();
    assert_eq!(stored.balance, 9000);
    assert_eq!(stored.version, 1);
    Ok(())
}

#[tokio::test]
async fn test_rolled_back_work_leaves_no_trace() -> Result<()> {
    let (service, dir) = test_service().await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let repo = Repository::connect(&database_url(&dir)).await?;
    let mut card = repo.get_card(created.card.id).await?.unwrap();
    card.balance = 0;

    let mut uow = repo.begin().await?;
    assert!(uow.update_card(&mut card).await?);
    uow.rollback().await?;

    let stored = repo.get_card(created.card.id).await?.unwrap();
    assert_eq!(stored.balance, 8500);
    assert_eq!(stored.version, 0);
    Ok(())
}

#[tokio::test]
async fn test_every_write_bumps_version() -> Result<()> {
    let (service, dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let outcome = service
        .apply_daily_update(
            &org.buyer,
            "FB-01",
            BalanceUpdate {
                reported_balance: Some(8000),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(outcome.card.version, 1);

    // Someone else writes the row in between; the service re-reads it.
    let repo = Repository::connect(&database_url(&dir)).await?;
    let mut card = repo.get_card(outcome.card.id).await?.unwrap();
    card.status = CardStatus::Blocked;
    let mut uow = repo.begin().await?;
    assert!(uow.update_card(&mut card).await?);
    uow.commit().await?;

    let outcome = service
        .apply_daily_update(
            &org.buyer,
            "FB-01",
            BalanceUpdate {
                topup_amount: Some(1000),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(outcome.card.version, 3);
    assert_eq!(outcome.card.balance, 9000);
    assert_eq!(outcome.card.status, CardStatus::Blocked);
    Ok(())
}
