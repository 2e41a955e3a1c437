use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{Account, Cents, Transaction};
use crate::storage::DateWindow;

use super::AppError;

/// Date format accepted for report windows.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReport {
    pub account: Account,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Newest first
    pub transactions: Vec<Transaction>,
    /// With a window: sum of every account's transaction amounts in it.
    /// Without one: the account's current balance.
    pub balance: Cents,
    /// Sum of this account's own transaction amounts in the window
    pub account_total: Option<Cents>,
}

impl TransactionReport {
    pub fn is_filtered(&self) -> bool {
        self.start_date.is_some()
    }
}

/// Turn optional `start_date` / `end_date` parameters into a window.
///
/// A window needs both ends; with only one given the report is unfiltered.
/// Malformed dates are an error rather than silently ignored, and so is a
/// window that ends before it starts.
pub fn parse_report_window(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<Option<DateWindow>, AppError> {
    let start = start_date.map(parse_date).transpose()?;
    let end = end_date.map(parse_date).transpose()?;

    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(AppError::InvalidDateRange {
            start: start.to_string(),
            end: end.to_string(),
        }),
        (Some(start), Some(end)) => Ok(Some(DateWindow { start, end })),
        _ => Ok(None),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AppError::InvalidDate(value.to_string()))
}
