mod common;

use anyhow::Result;
use common::{TestService, parse_date, test_service};
use teller::application::{ErrorKind, RequestContext, parse_report_window};
use teller::domain::{TransactionType, units};
use teller::io::write_report_csv;

/// alice: +1000 on Jan 5, -500 on Jan 20, +300 on Feb 2
/// bob:   +2000 on Jan 10
async fn seed_history(service: &TestService) -> Result<(RequestContext, RequestContext)> {
    service.open_account("alice", "alice@example.com").await?;
    service.open_account("bob", "bob@example.com").await?;
    let alice = service.context_for("alice").await?;
    let bob = service.context_for("bob").await?;

    service
        .deposit(&alice.at(parse_date("2024-01-05")), units(1000))
        .await?;
    service
        .deposit(&bob.at(parse_date("2024-01-10")), units(2000))
        .await?;
    service
        .withdraw(&alice.at(parse_date("2024-01-20")), units(500))
        .await?;
    service
        .deposit(&alice.at(parse_date("2024-02-02")), units(300))
        .await?;

    Ok((alice, bob))
}

#[tokio::test]
async fn test_unfiltered_report_shows_current_balance() -> Result<()> {
    let (service, _notifier, _temp) = test_service().await?;
    let (alice, _bob) = seed_history(&service).await?;

    let report = service.transaction_report(&alice, None).await?;

    assert!(!report.is_filtered());
    assert_eq!(report.balance, units(800));
    assert_eq!(report.account_total, None);
    assert_eq!(report.transactions.len(), 3);

    // Newest first
    let kinds: Vec<_> = report
        .transactions
        .iter()
        .map(|tx| tx.transaction_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Deposit
        ]
    );
    assert_eq!(report.transactions[0].balance_after_transaction, units(800));

    Ok(())
}

#[tokio::test]
async fn test_window_filters_and_aggregates() -> Result<()> {
    let (service, _notifier, _temp) = test_service().await?;
    let (alice, _bob) = seed_history(&service).await?;

    let window = parse_report_window(Some("2024-01-01"), Some("2024-01-31"))?;
    let report = service.transaction_report(&alice, window).await?;

    assert!(report.is_filtered());
    assert_eq!(report.transactions.len(), 2);
    assert!(
        report
            .transactions
            .iter()
            .all(|tx| tx.account_id == alice.account_id)
    );

    // Every account's amounts in January, bob's deposit included
    assert_eq!(report.balance, units(3500));
    assert_eq!(report.account_total, Some(units(1500)));

    Ok(())
}

#[tokio::test]
async fn test_window_bounds_are_inclusive() -> Result<()> {
    let (service, _notifier, _temp) = test_service().await?;
    let (alice, _bob) = seed_history(&service).await?;

    let window = parse_report_window(Some("2024-01-05"), Some("2024-01-20"))?;
    let report = service.transaction_report(&alice, window).await?;
    assert_eq!(report.transactions.len(), 2);

    let window = parse_report_window(Some("2024-01-06"), Some("2024-01-19"))?;
    let report = service.transaction_report(&alice, window).await?;
    assert!(report.transactions.is_empty());
    assert_eq!(report.account_total, Some(0));
    assert_eq!(report.balance, units(2000));

    Ok(())
}

#[tokio::test]
async fn test_empty_window_sums_to_zero() -> Result<()> {
    let (service, _notifier, _temp) = test_service().await?;
    let (alice, _bob) = seed_history(&service).await?;

    let window = parse_report_window(Some("2023-01-01"), Some("2023-12-31"))?;
    let report = service.transaction_report(&alice, window).await?;

    assert!(report.transactions.is_empty());
    assert_eq!(report.balance, 0);

    Ok(())
}

#[tokio::test]
async fn test_transfer_listed_for_sender_only() -> Result<()> {
    let (service, _notifier, _temp) = test_service().await?;
    let (alice, bob) = seed_history(&service).await?;

    service
        .transfer(&bob.at(parse_date("2024-01-15")), "alice", units(100))
        .await?;

    let alice_report = service.transaction_report(&alice, None).await?;
    assert!(
        alice_report
            .transactions
            .iter()
            .all(|tx| tx.transaction_type != TransactionType::Transfer)
    );
    assert_eq!(alice_report.balance, units(900));

    let bob_report = service.transaction_report(&bob, None).await?;
    assert_eq!(
        bob_report.transactions[0].recipient_account_id,
        Some(alice.account_id)
    );

    Ok(())
}

#[tokio::test]
async fn test_malformed_dates_rejected() -> Result<()> {
    let err = parse_report_window(Some("2024-13-01"), Some("2024-12-31")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = parse_report_window(Some("2024-02-01"), Some("2024-01-01")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    Ok(())
}

#[tokio::test]
async fn test_report_exports_as_csv() -> Result<()> {
    let (service, _notifier, _temp) = test_service().await?;
    let (alice, _bob) = seed_history(&service).await?;

    let report = service.transaction_report(&alice, None).await?;
    let mut out = Vec::new();
    let count = write_report_csv(&report, &mut out)?;
    assert_eq!(count, 3);

    let text = String::from_utf8(out)?;
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("id,timestamp,type,amount"));
    assert!(lines[1].contains(",deposit,300.00,800.00,"));

    Ok(())
}
