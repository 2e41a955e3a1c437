use anyhow::Result;
use std::io::Write;

use crate::application::TransactionReport;
use crate::domain::format_cents;

/// Write a report's transactions as CSV, one row per entry.
/// Amounts are plain decimals so spreadsheets can sum them.
pub fn write_report_csv<W: Write>(report: &TransactionReport, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    // Write header
    csv_writer.write_record([
        "id",
        "timestamp",
        "type",
        "amount",
        "balance_after_transaction",
        "recipient_account_id",
        "loan_approve",
    ])?;

    let mut count = 0;
    for tx in &report.transactions {
        csv_writer.write_record([
            tx.id.to_string(),
            tx.timestamp.to_rfc3339(),
            tx.transaction_type.as_str().to_string(),
            decimal(tx.amount),
            decimal(tx.balance_after_transaction),
            tx.recipient_account_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            tx.loan_approve.to_string(),
        ])?;
        count += 1;
    }

    csv_writer.flush()?;
    Ok(count)
}

/// Write the whole report, window and aggregates included, as JSON.
pub fn write_report_json<W: Write>(report: &TransactionReport, mut writer: W) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn decimal(cents: i64) -> String {
    format_cents(cents).replace(',', "")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::domain::{Account, Transaction, TransactionType};

    fn sample_report() -> TransactionReport {
        let mut account = Account::open(Uuid::new_v4());
        account.balance = 150000;
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();

        let mut deposit = Transaction::new(account.id, TransactionType::Deposit, 250000, at);
        deposit.balance_after_transaction = 250000;

        TransactionReport {
            account,
            start_date: None,
            end_date: None,
            transactions: vec![deposit],
            balance: 150000,
            account_total: None,
        }
    }

    #[test]
    fn test_csv_export() {
        let report = sample_report();
        let mut out = Vec::new();

        let count = write_report_csv(&report, &mut out).unwrap();
        assert_eq!(count, 1);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,timestamp,type,amount"));
        let row = lines.next().unwrap();
        assert!(row.contains(",deposit,2500.00,2500.00,,false"));
    }

    #[test]
    fn test_json_export_includes_aggregate() {
        let report = sample_report();
        let mut out = Vec::new();
        write_report_json(&report, &mut out).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["balance"], 150000);
        assert_eq!(value["transactions"][0]["transaction_type"], "deposit");
    }
}
