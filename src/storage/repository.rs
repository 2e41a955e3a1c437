use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Cents, Customer, FIRST_ACCOUNT_NO, Transaction, TransactionId,
    TransactionType, User, UserId,
};

use super::MIGRATION_001_INITIAL;

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TRANSACTION_COLUMNS: &str = "id, account_id, amount, transaction_type, timestamp, balance_after_transaction, recipient_account_id, loan_approve, loan_approved";

/// Result of a guarded balance mutation.
#[derive(Debug)]
pub enum Mutation {
    /// Money moved and the entry was recorded
    Applied(Transaction),
    /// The conditional debit matched no row: the balance no longer covers the amount
    InsufficientFunds,
    /// A guarded row was missing or not in the expected state; nothing was written
    Unmatched,
    /// The credit would take the balance past `i64::MAX` cents
    BalanceOverflow,
}

/// Outcome of a guarded credit.
enum Credit {
    Applied(Cents),
    Overflow,
    Missing,
}

/// Inclusive calendar-date window used by the report queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Repository over users, accounts and their transaction history.
///
/// Every operation that moves money runs inside one database transaction
/// and debits through a conditional `UPDATE ... WHERE balance >= ?`, so a
/// stale read elsewhere can never overdraw an account.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database. Writers wait on each other instead of
    /// failing immediately when the database is locked.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Users and accounts
    // ========================

    /// Register a user together with an empty account, assigning the next
    /// account number. Returns `false` when the username is already taken.
    pub async fn create_customer(&self, user: &User, account: &mut Account) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let inserted =
            sqlx::query("INSERT INTO users (id, username, email, created_at) VALUES (?, ?, ?, ?)")
                .bind(user.id.to_string())
                .bind(&user.username)
                .bind(&user.email)
                .bind(timestamp(&user.created_at))
                .execute(&mut *tx)
                .await;
        match inserted {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(false),
            other => {
                other.context("Failed to save user")?;
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, account_no, balance, created_at)
            VALUES (?, ?, (SELECT COALESCE(MAX(account_no) + 1, ?) FROM accounts), ?, ?)
            RETURNING account_no
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.user_id.to_string())
        .bind(FIRST_ACCOUNT_NO)
        .bind(account.balance)
        .bind(timestamp(&account.created_at))
        .fetch_one(&mut *tx)
        .await
        .context("Failed to save account")?;

        tx.commit().await.context("Failed to commit new customer")?;

        account.account_no = row.try_get("account_no")?;
        Ok(true)
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, email, created_at FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row =
            sqlx::query("SELECT id, username, email, created_at FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch user by username")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, user_id, account_no, balance, created_at FROM accounts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn get_account_by_user(&self, user_id: UserId) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, user_id, account_no, balance, created_at FROM accounts WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by user")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Resolve a username to the user and their account. A user without an
    /// account does not resolve.
    pub async fn get_customer_by_username(&self, username: &str) -> Result<Option<Customer>> {
        let Some(user) = self.get_user_by_username(username).await? else {
            return Ok(None);
        };
        let account = self.get_account_by_user(user.id).await?;
        Ok(account.map(|account| Customer { user, account }))
    }

    /// Resolve an account to its owner.
    pub async fn get_customer_by_account(&self, account_id: AccountId) -> Result<Option<Customer>> {
        let Some(account) = self.get_account(account_id).await? else {
            return Ok(None);
        };
        let user = self.get_user(account.user_id).await?;
        Ok(user.map(|user| Customer { user, account }))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, user_id, account_no, balance, created_at FROM accounts ORDER BY account_no",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    // ========================
    // Balance mutations
    // ========================

    /// Credit `amount` to the account and record a deposit.
    pub async fn apply_deposit(
        &self,
        account_id: AccountId,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<Mutation> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let balance = match credit(&mut tx, account_id, amount).await? {
            Credit::Applied(balance) => balance,
            Credit::Overflow => return Ok(Mutation::BalanceOverflow),
            Credit::Missing => return Ok(Mutation::Unmatched),
        };

        let mut entry = Transaction::new(account_id, TransactionType::Deposit, amount, at);
        entry.balance_after_transaction = balance;
        insert_transaction(&mut tx, &entry).await?;

        tx.commit().await.context("Failed to commit deposit")?;
        Ok(Mutation::Applied(entry))
    }

    /// Debit `amount` if, and only if, the balance still covers it.
    pub async fn apply_withdrawal(
        &self,
        account_id: AccountId,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<Mutation> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let Some(balance) = debit(&mut tx, account_id, amount).await? else {
            return Ok(Mutation::InsufficientFunds);
        };

        let mut entry = Transaction::new(account_id, TransactionType::Withdrawal, amount, at);
        entry.balance_after_transaction = balance;
        insert_transaction(&mut tx, &entry).await?;

        tx.commit().await.context("Failed to commit withdrawal")?;
        Ok(Mutation::Applied(entry))
    }

    /// Move `amount` from `sender` to `receiver` as one unit.
    ///
    /// Rows are touched in ascending account-id order. The sender's debit is
    /// conditional; if it or the receiver's credit matches nothing, the whole
    /// transaction rolls back on drop.
    pub async fn apply_transfer(
        &self,
        sender: AccountId,
        receiver: AccountId,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<Mutation> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let sender_balance = if sender < receiver {
            let Some(balance) = debit(&mut tx, sender, amount).await? else {
                return Ok(Mutation::InsufficientFunds);
            };
            if let Some(miss) = credit_or_miss(&mut tx, receiver, amount).await? {
                return Ok(miss);
            }
            balance
        } else {
            if let Some(miss) = credit_or_miss(&mut tx, receiver, amount).await? {
                return Ok(miss);
            }
            let Some(balance) = debit(&mut tx, sender, amount).await? else {
                return Ok(Mutation::InsufficientFunds);
            };
            balance
        };

        let mut entry = Transaction::new(sender, TransactionType::Transfer, amount, at)
            .with_recipient(receiver);
        entry.balance_after_transaction = sender_balance;
        insert_transaction(&mut tx, &entry).await?;

        tx.commit().await.context("Failed to commit transfer")?;
        Ok(Mutation::Applied(entry))
    }

    /// Record a loan request unless the account already holds
    /// `max_approved` approved, unpaid loans. Count and insert are a single
    /// statement, so concurrent requests cannot both slip under the cap.
    pub async fn request_loan(
        &self,
        account_id: AccountId,
        amount: Cents,
        at: DateTime<Utc>,
        max_approved: i64,
    ) -> Result<Mutation> {
        let mut entry = Transaction::new(account_id, TransactionType::Loan, amount, at);

        let row = sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, amount, transaction_type, timestamp, balance_after_transaction, recipient_account_id, loan_approve, loan_approved)
            SELECT ?, a.id, ?, ?, ?, a.balance, NULL, 0, 0
            FROM accounts a
            WHERE a.id = ?
              AND (SELECT COUNT(*) FROM transactions
                   WHERE account_id = a.id AND transaction_type = ? AND loan_approve = 1) < ?
            RETURNING balance_after_transaction
            "#,
        )
        .bind(entry.id.to_string())
        .bind(amount)
        .bind(TransactionType::Loan.code())
        .bind(timestamp(&at))
        .bind(account_id.to_string())
        .bind(TransactionType::Loan.code())
        .bind(max_approved)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to save loan request")?;

        let Some(row) = row else {
            return Ok(Mutation::Unmatched);
        };
        entry.balance_after_transaction = row.try_get("balance_after_transaction")?;
        Ok(Mutation::Applied(entry))
    }

    /// Approve a pending loan and credit its amount to the borrower.
    /// Returns `Unmatched` when the loan is missing, already approved or paid.
    pub async fn approve_loan(&self, loan_id: TransactionId) -> Result<Mutation> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let claimed = sqlx::query(
            r#"
            UPDATE transactions
            SET loan_approve = 1
            WHERE id = ? AND transaction_type = ? AND loan_approve = 0
            RETURNING account_id, amount
            "#,
        )
        .bind(loan_id.to_string())
        .bind(TransactionType::Loan.code())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to approve loan")?;

        let Some(claimed) = claimed else {
            return Ok(Mutation::Unmatched);
        };
        let account_id = parse_id(claimed.get("account_id"), "loan account ID")?;
        let amount: Cents = claimed.try_get("amount")?;

        let balance = match credit(&mut tx, account_id, amount).await? {
            Credit::Applied(balance) => balance,
            Credit::Overflow => return Ok(Mutation::BalanceOverflow),
            Credit::Missing => return Ok(Mutation::Unmatched),
        };
        set_snapshot(&mut tx, loan_id, balance).await?;

        let loan = fetch_transaction(&mut tx, loan_id).await?;
        tx.commit().await.context("Failed to commit loan approval")?;
        Ok(Mutation::Applied(loan))
    }

    /// Pay off an approved loan from the borrower's balance.
    ///
    /// The type flip from LOAN to LOAN_PAID is the guard: a second payoff
    /// finds no LOAN row and returns `Unmatched`. The balance must strictly
    /// exceed the loan amount.
    pub async fn pay_loan(&self, loan_id: TransactionId) -> Result<Mutation> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let claimed = sqlx::query(
            r#"
            UPDATE transactions
            SET transaction_type = ?, loan_approved = 1
            WHERE id = ? AND transaction_type = ? AND loan_approve = 1
            RETURNING account_id, amount
            "#,
        )
        .bind(TransactionType::LoanPaid.code())
        .bind(loan_id.to_string())
        .bind(TransactionType::Loan.code())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to mark loan as paid")?;

        let Some(claimed) = claimed else {
            return Ok(Mutation::Unmatched);
        };
        let account_id = parse_id(claimed.get("account_id"), "loan account ID")?;
        let amount: Cents = claimed.try_get("amount")?;

        let row = sqlx::query(
            "UPDATE accounts SET balance = balance - ? WHERE id = ? AND balance > ? RETURNING balance",
        )
        .bind(amount)
        .bind(account_id.to_string())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to debit loan payoff")?;

        let Some(row) = row else {
            return Ok(Mutation::InsufficientFunds);
        };
        set_snapshot(&mut tx, loan_id, row.try_get("balance")?).await?;

        let loan = fetch_transaction(&mut tx, loan_id).await?;
        tx.commit().await.context("Failed to commit loan payoff")?;
        Ok(Mutation::Applied(loan))
    }

    // ========================
    // Queries
    // ========================

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// Transactions owned by an account, newest first, optionally limited to
    /// a calendar-date window (inclusive on both ends).
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        window: Option<DateWindow>,
    ) -> Result<Vec<Transaction>> {
        let mut query =
            format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?");
        if window.is_some() {
            query.push_str(" AND date(timestamp) BETWEEN ? AND ?");
        }
        query.push_str(" ORDER BY timestamp DESC, rowid DESC");

        let mut sql_query = sqlx::query(&query).bind(account_id.to_string());
        if let Some(w) = window {
            sql_query = sql_query.bind(w.start.to_string()).bind(w.end.to_string());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Loan entries (pending, approved and paid) of an account, newest first.
    pub async fn list_loans(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ? AND transaction_type IN (?, ?) ORDER BY timestamp DESC, rowid DESC"
        ))
        .bind(account_id.to_string())
        .bind(TransactionType::Loan.code())
        .bind(TransactionType::LoanPaid.code())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loans")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Every transaction in the ledger, oldest first.
    pub async fn list_all_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY timestamp, rowid"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list all transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Sum of amounts of all accounts' transactions within the window.
    pub async fn sum_amounts_between(&self, window: DateWindow) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) as total
            FROM transactions
            WHERE date(timestamp) BETWEEN ? AND ?
            "#,
        )
        .bind(window.start.to_string())
        .bind(window.end.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum transactions")?;

        Ok(row.try_get("total")?)
    }

    /// Sum of amounts of one account's transactions within the window.
    pub async fn sum_account_amounts_between(
        &self,
        account_id: AccountId,
        window: DateWindow,
    ) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) as total
            FROM transactions
            WHERE account_id = ? AND date(timestamp) BETWEEN ? AND ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(window.start.to_string())
        .bind(window.end.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum account transactions")?;

        Ok(row.try_get("total")?)
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        Ok(User {
            id: parse_id(row.get("id"), "user ID")?,
            username: row.get("username"),
            email: row.get("email"),
            created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        })
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        Ok(Account {
            id: parse_id(row.get("id"), "account ID")?,
            user_id: parse_id(row.get("user_id"), "account user ID")?,
            account_no: row.get("account_no"),
            balance: row.try_get("balance")?,
            created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let type_code: i64 = row.get("transaction_type");
        let recipient: Option<String> = row.get("recipient_account_id");

        Ok(Transaction {
            id: parse_id(row.get("id"), "transaction ID")?,
            account_id: parse_id(row.get("account_id"), "transaction account ID")?,
            amount: row.try_get("amount")?,
            transaction_type: TransactionType::from_code(type_code)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_code))?,
            timestamp: parse_timestamp(row.get("timestamp"), "timestamp")?,
            balance_after_transaction: row.try_get("balance_after_transaction")?,
            recipient_account_id: recipient
                .map(|s| parse_id(s, "recipient account ID"))
                .transpose()?,
            loan_approve: row.get::<i64, _>("loan_approve") != 0,
            loan_approved: row.get::<i64, _>("loan_approved") != 0,
        })
    }
}

type DbTransaction = sqlx::Transaction<'static, Sqlite>;

/// Add `amount` to an account unless the sum would leave the `i64` range.
/// SQLite would otherwise store the result as a REAL.
async fn credit(tx: &mut DbTransaction, account_id: AccountId, amount: Cents) -> Result<Credit> {
    let row = sqlx::query(
        "UPDATE accounts SET balance = balance + ? WHERE id = ? AND balance <= ? - ? RETURNING balance",
    )
    .bind(amount)
    .bind(account_id.to_string())
    .bind(i64::MAX)
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to credit account")?;

    if let Some(row) = row {
        return Ok(Credit::Applied(row.try_get("balance")?));
    }

    let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
        .bind(account_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to look up account")?;
    Ok(if exists.is_some() {
        Credit::Overflow
    } else {
        Credit::Missing
    })
}

/// Credit inside a multi-step mutation; `Some` is the outcome to return early.
async fn credit_or_miss(
    tx: &mut DbTransaction,
    account_id: AccountId,
    amount: Cents,
) -> Result<Option<Mutation>> {
    Ok(match credit(tx, account_id, amount).await? {
        Credit::Applied(_) => None,
        Credit::Overflow => Some(Mutation::BalanceOverflow),
        Credit::Missing => Some(Mutation::Unmatched),
    })
}

/// Subtract `amount` from an account if the balance covers it, returning
/// the new balance. `None` means nothing was changed.
async fn debit(
    tx: &mut DbTransaction,
    account_id: AccountId,
    amount: Cents,
) -> Result<Option<Cents>> {
    let row = sqlx::query(
        "UPDATE accounts SET balance = balance - ? WHERE id = ? AND balance >= ? RETURNING balance",
    )
    .bind(amount)
    .bind(account_id.to_string())
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to debit account")?;

    Ok(row.map(|r| r.try_get("balance")).transpose()?)
}

async fn insert_transaction(tx: &mut DbTransaction, entry: &Transaction) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(entry.id.to_string())
    .bind(entry.account_id.to_string())
    .bind(entry.amount)
    .bind(entry.transaction_type.code())
    .bind(timestamp(&entry.timestamp))
    .bind(entry.balance_after_transaction)
    .bind(entry.recipient_account_id.map(|id| id.to_string()))
    .bind(entry.loan_approve)
    .bind(entry.loan_approved)
    .execute(&mut **tx)
    .await
    .context("Failed to save transaction")?;
    Ok(())
}

async fn set_snapshot(tx: &mut DbTransaction, id: TransactionId, balance: Cents) -> Result<()> {
    sqlx::query("UPDATE transactions SET balance_after_transaction = ? WHERE id = ?")
        .bind(balance)
        .bind(id.to_string())
        .execute(&mut **tx)
        .await
        .context("Failed to update balance snapshot")?;
    Ok(())
}

async fn fetch_transaction(tx: &mut DbTransaction, id: TransactionId) -> Result<Transaction> {
    let row = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_one(&mut **tx)
    .await
    .context("Failed to reload transaction")?;

    Repository::row_to_transaction(&row)
}

/// Timestamps are stored as fixed-precision UTC RFC 3339 strings so that
/// they sort lexically and SQLite's `date()` understands them.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String, what: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid {} timestamp", what))?
        .with_timezone(&Utc))
}

fn parse_id(value: String, what: &str) -> Result<Uuid> {
    Uuid::parse_str(&value).with_context(|| format!("Invalid {}", what))
}
