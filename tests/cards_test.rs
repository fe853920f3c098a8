mod common;

use anyhow::Result;
use cardledger::application::{AppError, BalanceUpdate, CardFilter, NewCard, TransactionFilter};
use cardledger::domain::{CardLifecycle, CardStatus};
use common::{Org, alpha_card, date, reopen_at, test_service};

#[tokio::test]
async fn test_create_card_defaults_and_validation() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;

    let outcome = service
        .create_card(
            &org.manager,
            NewCard {
                name: "  FB-01 ".into(),
                buyer: Some("bob".into()),
                currency: Some("eur".into()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(outcome.card.name, "FB-01");
    assert_eq!(outcome.card.currency, "EUR");
    assert!(outcome.card.buyer_id.is_some());
    assert_eq!(outcome.card.created_by, org.manager.user_id);

    let duplicate = service.create_card(&org.manager, alpha_card("FB-01", 0)).await;
    assert!(matches!(duplicate, Err(AppError::AlreadyExists(_))));

    let unnamed = service.create_card(&org.manager, alpha_card("  ", 0)).await;
    assert!(matches!(unnamed, Err(AppError::MissingField("name"))));

    let negative = service.create_card(&org.manager, alpha_card("FB-02", -1)).await;
    assert!(matches!(negative, Err(AppError::InvalidAmount(_))));

    let bad_currency = service
        .create_card(
            &org.manager,
            NewCard {
                currency: Some("dollars".into()),
                ..alpha_card("FB-03", 0)
            },
        )
        .await;
    assert!(matches!(bad_currency, Err(AppError::InvalidInput(_))));

    let unknown_buyer = service
        .create_card(
            &org.manager,
            NewCard {
                buyer: Some("nobody".into()),
                ..alpha_card("FB-04", 0)
            },
        )
        .await;
    assert!(matches!(unknown_buyer, Err(AppError::BuyerNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_same_name_in_two_teams() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;

    service.create_card(&org.manager, alpha_card("SHARED", 0)).await?;
    let bravo = service
        .create_card(
            &org.other_manager,
            NewCard {
                name: "SHARED".into(),
                ..Default::default()
            },
        )
        .await?;

    // Each manager resolves the name inside their own team
    let mine = service.get_card(&org.other_manager, "SHARED").await?;
    assert_eq!(mine.card.id, bravo.card.id);
    assert_eq!(mine.team_name, "Bravo");

    // An admin has to disambiguate
    let ambiguous = service.get_card(&org.admin, "SHARED").await;
    assert!(matches!(ambiguous, Err(AppError::InvalidInput(_))));
    let by_id = service
        .get_card(&org.admin, &bravo.card.id.to_string())
        .await?;
    assert_eq!(by_id.card.name, "SHARED");
    Ok(())
}

#[tokio::test]
async fn test_assign_buyer_must_belong_to_card_team() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 0)).await?;
    let bravo_buyer = service
        .create_buyer(&org.other_manager, None, "bruno")
        .await?;

    let mismatch = service
        .assign_buyer(&org.manager, "FB-01", Some(&bravo_buyer.id.to_string()))
        .await;
    assert!(matches!(mismatch, Err(AppError::BuyerTeamMismatch { .. })));

    let assigned = service
        .assign_buyer(&org.manager, "FB-01", Some("bob"))
        .await?;
    assert!(assigned.buyer_id.is_some());
    assert_eq!(assigned.version, 1);

    let view = service.get_card(&org.manager, "FB-01").await?;
    assert_eq!(view.buyer_name.as_deref(), Some("bob"));

    let unassigned = service.assign_buyer(&org.manager, "FB-01", None).await?;
    assert_eq!(unassigned.buyer_id, None);
    assert_eq!(unassigned.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_topup_limit_updates() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 0)).await?;

    let card = service
        .set_topup_limit(&org.manager, "FB-01", Some(50000))
        .await?;
    assert_eq!(card.topup_limit, Some(50000));

    let zero = service.set_topup_limit(&org.manager, "FB-01", Some(0)).await;
    assert!(matches!(zero, Err(AppError::InvalidAmount(_))));

    let cleared = service.set_topup_limit(&org.manager, "FB-01", None).await?;
    assert_eq!(cleared.topup_limit, None);
    Ok(())
}

#[tokio::test]
async fn test_status_changes_are_stored() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 0)).await?;

    for status in [CardStatus::Blocked, CardStatus::Reissue, CardStatus::Active] {
        let card = service.set_status(&org.manager, "FB-01", status).await?;
        assert_eq!(card.status, status);
    }
    let blocked = service
        .set_status(&org.admin, "FB-01", CardStatus::Blocked)
        .await?;
    assert_eq!(blocked.version, 4);

    let filtered = service
        .list_cards(
            &org.manager,
            &CardFilter {
                status: Some(CardStatus::Blocked),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(filtered.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_idle_card_displays_not_spinning() -> Result<()> {
    let (service, dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("IDLE", 10000)).await?;
    service.create_card(&org.manager, alpha_card("BUSY", 10000)).await?;
    service.create_card(&org.manager, alpha_card("FRESH", 0)).await?;

    // Two days later: nothing is idle yet
    let later = reopen_at(&dir, "2024-05-12T09:00:00Z").await?;
    let view = later.get_card(&org.manager, "IDLE").await?;
    assert_eq!(view.display_status, CardStatus::Active);
    later
        .apply_daily_update(
            &org.buyer,
            "BUSY",
            BalanceUpdate {
                reported_balance: Some(8000),
                ..Default::default()
            },
        )
        .await?;

    // Three days after the last activity of IDLE and FRESH
    let much_later = reopen_at(&dir, "2024-05-13T09:00:00Z").await?;
    let idle = much_later.get_card(&org.manager, "IDLE").await?;
    assert_eq!(idle.display_status, CardStatus::NotSpinning);
    assert_eq!(idle.card.status, CardStatus::Active);
    assert_eq!(idle.card.last_transaction_date, Some(date("2024-05-10")));

    let fresh = much_later.get_card(&org.manager, "FRESH").await?;
    assert_eq!(fresh.display_status, CardStatus::NotSpinning);

    let busy = much_later.get_card(&org.manager, "BUSY").await?;
    assert_eq!(busy.display_status, CardStatus::Active);

    let not_spinning = much_later
        .list_cards(
            &org.manager,
            &CardFilter {
                status: Some(CardStatus::NotSpinning),
                ..Default::default()
            },
        )
        .await?;
    let names: Vec<&str> = not_spinning.iter().map(|v| v.card.name.as_str()).collect();
    assert_eq!(names, vec!["FRESH", "IDLE"]);
    Ok(())
}

#[tokio::test]
async fn test_soft_delete_keeps_history() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    let created = service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;

    let deleted = service.delete_card(&org.manager, "FB-01").await?;
    assert!(matches!(deleted.lifecycle, CardLifecycle::Deleted { .. }));
    assert_eq!(deleted.status, CardStatus::Active);

    let lookup = service.get_card(&org.manager, "FB-01").await;
    assert!(matches!(lookup, Err(AppError::CardNotFound(_))));

    let update = service
        .apply_daily_update(
            &org.buyer,
            &created.card.id.to_string(),
            BalanceUpdate {
                topup_amount: Some(100),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(update, Err(AppError::CardNotFound(_))));

    assert!(
        service
            .list_cards(&org.manager, &CardFilter::default())
            .await?
            .is_empty()
    );
    let with_deleted = service
        .list_cards(
            &org.manager,
            &CardFilter {
                include_deleted: true,
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(with_deleted.len(), 1);
    assert!(with_deleted[0].card.is_deleted());

    let history = service
        .list_transactions(&org.manager, &TransactionFilter::default())
        .await?;
    assert_eq!(history.len(), 2);

    // The name is free again
    let replacement = service.create_card(&org.manager, alpha_card("FB-01", 0)).await?;
    assert_ne!(replacement.card.id, created.card.id);
    Ok(())
}

#[tokio::test]
async fn test_transaction_filters() -> Result<()> {
    let (service, _dir) = test_service().await?;
    let org = Org::create(&service).await?;
    service.create_card(&org.manager, alpha_card("FB-01", 10000)).await?;
    service.create_card(&org.manager, alpha_card("FB-02", 20000)).await?;
    let spend = service
        .apply_daily_update(
            &org.buyer,
            "FB-01",
            BalanceUpdate {
                reported_balance: Some(5000),
                date: Some(date("2024-05-08")),
                ..Default::default()
            },
        )
        .await?;
    service
        .cancel_transaction(&org.manager, spend.entries[0].id)
        .await?;

    let fb01 = service
        .list_transactions(
            &org.manager,
            &TransactionFilter {
                card: Some("FB-01".into()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(fb01.len(), 2);

    let with_cancelled = service
        .list_transactions(
            &org.manager,
            &TransactionFilter {
                card: Some("FB-01".into()),
                include_cancelled: true,
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(with_cancelled.len(), 3);

    let early = service
        .list_transactions(
            &org.manager,
            &TransactionFilter {
                to_date: Some(date("2024-05-09")),
                include_cancelled: true,
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].id, spend.entries[0].id);

    let limited = service
        .list_transactions(
            &org.manager,
            &TransactionFilter {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(limited.len(), 1);

    let backwards = service
        .list_transactions(
            &org.manager,
            &TransactionFilter {
                from_date: Some(date("2024-05-10")),
                to_date: Some(date("2024-05-01")),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(backwards, Err(AppError::InvalidInput(_))));
    Ok(())
}
