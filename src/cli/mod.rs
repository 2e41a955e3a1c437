use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::application::{BankService, RequestContext, TransactionReport, parse_report_window};
use crate::domain::{Limits, Transaction, format_cents, parse_cents};
use crate::io::{write_report_csv, write_report_json};

/// Teller - banking transactions over a local ledger
#[derive(Parser)]
#[command(name = "teller")]
#[command(about = "Deposits, withdrawals, loans and transfers over a SQLite ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "TELLER_DB", default_value = "teller.db")]
    pub database: String,

    /// Username the command acts for
    #[arg(short, long, env = "TELLER_USER", global = true)]
    pub user: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub limits: LimitArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for the amount limits (whole currency units)
#[derive(Args, Debug, Clone)]
pub struct LimitArgs {
    /// Smallest accepted deposit
    #[arg(long, global = true)]
    pub min_deposit: Option<String>,

    /// Smallest accepted withdrawal
    #[arg(long, global = true)]
    pub min_withdrawal: Option<String>,

    /// Largest accepted withdrawal
    #[arg(long, global = true)]
    pub max_withdrawal: Option<String>,

    /// Approved loans an account may hold
    #[arg(long, global = true)]
    pub max_loans: Option<i64>,
}

impl LimitArgs {
    pub fn resolve(&self) -> Result<Limits> {
        let mut limits = Limits::default();
        if let Some(v) = &self.min_deposit {
            limits.min_deposit = parse_cents(v).context("Invalid --min-deposit")?;
        }
        if let Some(v) = &self.min_withdrawal {
            limits.min_withdrawal = parse_cents(v).context("Invalid --min-withdrawal")?;
        }
        if let Some(v) = &self.max_withdrawal {
            limits.max_withdrawal = parse_cents(v).context("Invalid --max-withdrawal")?;
        }
        if let Some(v) = self.max_loans {
            limits.max_approved_loans = v;
        }
        Ok(limits)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Register a user with an empty account
    Open {
        /// Username (must be unique)
        username: String,

        /// Address notifications are sent to
        #[arg(short, long)]
        email: String,
    },

    /// Show the acting user's account
    Balance,

    /// Deposit money (e.g., "150.00" or "150")
    Deposit { amount: String },

    /// Withdraw money
    Withdraw { amount: String },

    /// Transfer money to another user
    Transfer {
        amount: String,

        /// Recipient username
        #[arg(long)]
        to: String,
    },

    /// Loan commands
    #[command(subcommand)]
    Loan(LoanCommands),

    /// Show transaction history
    Report {
        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,

        /// Window end (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,

        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Verify stored balances against transaction history
    Check,
}

#[derive(Subcommand)]
pub enum LoanCommands {
    /// Request a loan
    Request { amount: String },

    /// Approve a pending loan (bank side)
    Approve { id: String },

    /// Pay off an approved loan
    Pay { id: String },

    /// List the acting user's loans
    List,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let limits = self.limits.resolve()?;

        if matches!(self.command, Commands::Init) {
            BankService::init(&self.database).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = BankService::connect(&self.database)
            .await?
            .with_limits(limits);

        match self.command {
            // Handled before connecting
            Commands::Init => {}

            Commands::Open { username, email } => {
                let customer = service.open_account(&username, &email).await?;
                println!(
                    "Opened account {} for {}",
                    customer.account.account_no, customer.user.username
                );
            }

            Commands::Balance => {
                let ctx = acting_context(&service, self.user.as_deref()).await?;
                let customer = service.get_customer(&ctx).await?;
                println!("Account:  {}", customer.account.account_no);
                println!("Owner:    {}", customer.user.username);
                println!("Balance:  {}", format_cents(customer.account.balance));
            }

            Commands::Deposit { amount } => {
                let ctx = acting_context(&service, self.user.as_deref()).await?;
                let entry = service.deposit(&ctx, parse_amount(&amount)?).await?;
                println!(
                    "{}$ was deposited to your account successfully (balance {})",
                    format_cents(entry.amount),
                    format_cents(entry.balance_after_transaction)
                );
            }

            Commands::Withdraw { amount } => {
                let ctx = acting_context(&service, self.user.as_deref()).await?;
                let entry = service.withdraw(&ctx, parse_amount(&amount)?).await?;
                println!(
                    "Successfully withdrawn {}$ from your account (balance {})",
                    format_cents(entry.amount),
                    format_cents(entry.balance_after_transaction)
                );
            }

            Commands::Transfer { amount, to } => {
                let ctx = acting_context(&service, self.user.as_deref()).await?;
                let result = service.transfer(&ctx, &to, parse_amount(&amount)?).await?;
                println!(
                    "Successfully transferred {} to {} (balance {})",
                    format_cents(result.transaction.amount),
                    result.recipient.user.username,
                    format_cents(result.transaction.balance_after_transaction)
                );
            }

            Commands::Loan(loan_cmd) => {
                run_loan_command(&service, self.user.as_deref(), loan_cmd).await?;
            }

            Commands::Report {
                start_date,
                end_date,
                format,
            } => {
                let ctx = acting_context(&service, self.user.as_deref()).await?;
                let window = parse_report_window(start_date.as_deref(), end_date.as_deref())?;
                let report = service.transaction_report(&ctx, window).await?;
                print_report(&report, &format)?;
            }

            Commands::Check => {
                let report = service.check_integrity().await?;
                println!(
                    "Checked {} accounts, {} transactions",
                    report.account_count, report.transaction_count
                );
                for m in &report.mismatches {
                    println!(
                        "  account {}: stored {} but history gives {}",
                        m.account_no,
                        format_cents(m.stored),
                        format_cents(m.replayed)
                    );
                }
                for account_id in &report.negative_balances {
                    println!("  account {}: balance is negative", account_id);
                }
                if report.dangling_recipients > 0 {
                    println!(
                        "  {} transfers point at unknown accounts",
                        report.dangling_recipients
                    );
                }
                if report.is_healthy() {
                    println!("Ledger OK");
                } else {
                    anyhow::bail!("Ledger integrity check failed");
                }
            }
        }

        Ok(())
    }
}

async fn run_loan_command(
    service: &BankService,
    user: Option<&str>,
    cmd: LoanCommands,
) -> Result<()> {
    match cmd {
        LoanCommands::Request { amount } => {
            let ctx = acting_context(service, user).await?;
            let loan = service.request_loan(&ctx, parse_amount(&amount)?).await?;
            println!(
                "Loan request for {}$ submitted successfully ({})",
                format_cents(loan.amount),
                loan.id
            );
        }

        LoanCommands::Approve { id } => {
            let loan = service.approve_loan(parse_id(&id)?).await?;
            println!(
                "Approved loan {} of {} (balance {})",
                loan.id,
                format_cents(loan.amount),
                format_cents(loan.balance_after_transaction)
            );
        }

        LoanCommands::Pay { id } => {
            let ctx = acting_context(service, user).await?;
            let loan = service.pay_loan(&ctx, parse_id(&id)?).await?;
            println!(
                "Paid loan {} of {} (balance {})",
                loan.id,
                format_cents(loan.amount),
                format_cents(loan.balance_after_transaction)
            );
        }

        LoanCommands::List => {
            let ctx = acting_context(service, user).await?;
            let loans = service.list_loans(&ctx).await?;
            if loans.is_empty() {
                println!("No loans found.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<10}  {:>14}  {:<8}",
                "ID", "DATE", "AMOUNT", "STATUS"
            );
            println!("{}", "-".repeat(74));
            for loan in &loans {
                println!(
                    "{:<36}  {:<10}  {:>14}  {:<8}",
                    loan.id,
                    loan.timestamp.format("%Y-%m-%d"),
                    format_cents(loan.amount),
                    loan_status(loan)
                );
            }
        }
    }

    Ok(())
}

fn loan_status(loan: &Transaction) -> &'static str {
    if loan.is_paid_loan() {
        "paid"
    } else if loan.loan_approve {
        "approved"
    } else {
        "pending"
    }
}

fn print_report(report: &TransactionReport, format: &str) -> Result<()> {
    match format {
        "json" => write_report_json(report, std::io::stdout().lock()),
        "csv" => write_report_csv(report, std::io::stdout().lock()).map(|_| ()),
        "table" => {
            if let (Some(start), Some(end)) = (report.start_date, report.end_date) {
                println!("Transactions from {} to {}", start, end);
            }
            if report.transactions.is_empty() {
                println!("No transactions found.");
            } else {
                println!(
                    "{:<19}  {:<10}  {:>14}  {:>14}",
                    "DATE", "TYPE", "AMOUNT", "BALANCE AFTER"
                );
                println!("{}", "-".repeat(63));
                for tx in &report.transactions {
                    println!(
                        "{:<19}  {:<10}  {:>14}  {:>14}",
                        tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        tx.transaction_type.as_str(),
                        format_cents(tx.amount),
                        format_cents(tx.balance_after_transaction)
                    );
                }
            }
            println!();
            println!("Balance: {}", format_cents(report.balance));
            if let Some(total) = report.account_total {
                println!("Account total in window: {}", format_cents(total));
            }
            Ok(())
        }
        other => anyhow::bail!("Unknown format '{}'. Use table, json or csv", other),
    }
}

async fn acting_context(service: &BankService, user: Option<&str>) -> Result<RequestContext> {
    let username = user.context("No acting user. Pass --user or set TELLER_USER")?;
    Ok(service.context_for(username).await?)
}

fn parse_amount(amount: &str) -> Result<i64> {
    parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).context("Invalid loan ID format (expected UUID)")
}
