// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use teller::application::{BankService, Notice, Notifier, NotifyError, RequestContext};
use teller::domain::{Cents, units};
use tempfile::TempDir;

/// Notifier that keeps every notice it is asked to send.
/// A failing one records nothing and reports a delivery error.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notice>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, email: &str) -> Vec<Notice> {
        self.sent().into_iter().filter(|n| n.to == email).collect()
    }
}

impl Notifier for RecordingNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery {
                to: notice.to.clone(),
                reason: "mail server unreachable".into(),
            });
        }
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub type TestService = BankService<RecordingNotifier>;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(TestService, RecordingNotifier, TempDir)> {
    test_service_with(RecordingNotifier::default()).await
}

pub async fn test_service_with(
    notifier: RecordingNotifier,
) -> Result<(TestService, RecordingNotifier, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = BankService::init(db_path.to_str().unwrap())
        .await?
        .with_notifier(notifier.clone());
    Ok((service, notifier, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc> at noon
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc()
}

/// Open an account for `username` and deposit `whole_units` into it.
pub async fn open_funded(
    service: &TestService,
    username: &str,
    whole_units: i64,
) -> Result<RequestContext> {
    service
        .open_account(username, &format!("{username}@example.com"))
        .await?;
    let ctx = service.context_for(username).await?;
    if whole_units > 0 {
        service.deposit(&ctx, units(whole_units)).await?;
    }
    Ok(ctx)
}

pub async fn balance_of(service: &TestService, ctx: &RequestContext) -> Result<Cents> {
    Ok(service.get_customer(ctx).await?.account.balance)
}
