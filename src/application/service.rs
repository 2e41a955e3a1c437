use tracing::{debug, info, warn};

use crate::domain::{
    Account, Cents, Customer, IntegrityReport, Limits, Rejection, Transaction, TransactionId,
    TransactionType, User, build_integrity_report, format_cents, validate,
};
use crate::storage::{DateWindow, Mutation, Repository};

use super::notify::{LogNotifier, Notice, NoticeKind, Notifier, dispatch};
use super::{AppError, RequestContext, TransactionReport};

/// Application service providing the bank operations.
/// This is the primary interface for any client (CLI, API, etc.).
pub struct BankService<N = LogNotifier> {
    repo: Repository,
    notifier: N,
    limits: Limits,
}

/// Result of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub transaction: Transaction,
    pub sender: Customer,
    pub recipient: Customer,
}

impl BankService<LogNotifier> {
    /// Create a service over `repo` that logs notices and uses default limits.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            notifier: LogNotifier,
            limits: Limits::default(),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }
}

impl<N: Notifier> BankService<N> {
    /// Swap the notification channel.
    pub fn with_notifier<M: Notifier>(self, notifier: M) -> BankService<M> {
        BankService {
            repo: self.repo,
            notifier,
            limits: self.limits,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    // ========================
    // Customers
    // ========================

    /// Register a user with an empty account.
    pub async fn open_account(&self, username: &str, email: &str) -> Result<Customer, AppError> {
        if self.repo.get_user_by_username(username).await?.is_some() {
            return Err(AppError::UsernameTaken(username.to_string()));
        }

        let user = User::new(username, email);
        let mut account = Account::open(user.id);
        if !self.repo.create_customer(&user, &mut account).await? {
            // Lost a race with a concurrent registration of the same name
            return Err(AppError::UsernameTaken(username.to_string()));
        }

        info!(
            username = %user.username,
            account_no = account.account_no,
            "account opened"
        );
        Ok(Customer { user, account })
    }

    /// Resolve an authenticated username into a request context.
    pub async fn context_for(&self, username: &str) -> Result<RequestContext, AppError> {
        let user = self
            .repo
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))?;
        let account = self
            .repo
            .get_account_by_user(user.id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))?;

        Ok(RequestContext::new(account.id))
    }

    /// The requester together with a fresh read of their account.
    pub async fn get_customer(&self, ctx: &RequestContext) -> Result<Customer, AppError> {
        self.repo
            .get_customer_by_account(ctx.account_id)
            .await?
            .ok_or(AppError::AccountNotFound(ctx.account_id))
    }

    // ========================
    // Balance operations
    // ========================

    pub async fn deposit(
        &self,
        ctx: &RequestContext,
        amount: Cents,
    ) -> Result<Transaction, AppError> {
        let customer = self.get_customer(ctx).await?;
        let amount = self.check(TransactionType::Deposit, amount, &customer.account)?;

        let entry = match self
            .repo
            .apply_deposit(ctx.account_id, amount, ctx.received_at)
            .await?
        {
            Mutation::Applied(entry) => entry,
            Mutation::BalanceOverflow => {
                return Err(self.reject(
                    TransactionType::Deposit,
                    &customer.account,
                    Rejection::BalanceLimitExceeded,
                ));
            }
            Mutation::InsufficientFunds | Mutation::Unmatched => {
                return Err(AppError::AccountNotFound(ctx.account_id));
            }
        };

        info!(
            account_no = customer.account.account_no,
            amount = %format_cents(amount),
            balance = %format_cents(entry.balance_after_transaction),
            "deposit applied"
        );
        dispatch(
            &self.notifier,
            Notice::new(&customer.user, amount, NoticeKind::Deposit),
        )
        .await;

        Ok(entry)
    }

    pub async fn withdraw(
        &self,
        ctx: &RequestContext,
        amount: Cents,
    ) -> Result<Transaction, AppError> {
        let customer = self.get_customer(ctx).await?;
        let amount = self.check(TransactionType::Withdrawal, amount, &customer.account)?;

        let entry = match self
            .repo
            .apply_withdrawal(ctx.account_id, amount, ctx.received_at)
            .await?
        {
            Mutation::Applied(entry) => entry,
            Mutation::InsufficientFunds | Mutation::Unmatched | Mutation::BalanceOverflow => {
                warn!(
                    account_no = customer.account.account_no,
                    amount = %format_cents(amount),
                    "withdrawal lost a race for the balance"
                );
                return Err(AppError::bank_insufficient_funds("withdrawal"));
            }
        };

        info!(
            account_no = customer.account.account_no,
            amount = %format_cents(amount),
            balance = %format_cents(entry.balance_after_transaction),
            "withdrawal applied"
        );
        dispatch(
            &self.notifier,
            Notice::new(&customer.user, amount, NoticeKind::Withdrawal),
        )
        .await;

        Ok(entry)
    }

    /// Move money to the account of `recipient_username`.
    pub async fn transfer(
        &self,
        ctx: &RequestContext,
        recipient_username: &str,
        amount: Cents,
    ) -> Result<TransferResult, AppError> {
        let sender = self.get_customer(ctx).await?;
        let amount = self.check(TransactionType::Transfer, amount, &sender.account)?;

        let Some(recipient) = self
            .repo
            .get_customer_by_username(recipient_username)
            .await?
        else {
            return Err(self.reject(
                TransactionType::Transfer,
                &sender.account,
                Rejection::RecipientNotFound(recipient_username.to_string()),
            ));
        };

        if recipient.account.id == sender.account.id {
            return Err(self.reject(
                TransactionType::Transfer,
                &sender.account,
                Rejection::SelfTransfer,
            ));
        }

        let transaction = match self
            .repo
            .apply_transfer(
                sender.account.id,
                recipient.account.id,
                amount,
                ctx.received_at,
            )
            .await?
        {
            Mutation::Applied(entry) => entry,
            Mutation::InsufficientFunds => {
                warn!(
                    account_no = sender.account.account_no,
                    amount = %format_cents(amount),
                    "transfer lost a race for the balance"
                );
                return Err(AppError::bank_insufficient_funds("transfer"));
            }
            Mutation::Unmatched => return Err(AppError::AccountNotFound(recipient.account.id)),
            Mutation::BalanceOverflow => {
                return Err(self.reject(
                    TransactionType::Transfer,
                    &sender.account,
                    Rejection::BalanceLimitExceeded,
                ));
            }
        };

        info!(
            from = %sender.user.username,
            to = %recipient.user.username,
            amount = %format_cents(amount),
            balance = %format_cents(transaction.balance_after_transaction),
            "transfer applied"
        );

        dispatch(
            &self.notifier,
            Notice::new(
                &sender.user,
                amount,
                NoticeKind::TransferSent {
                    to_username: recipient.user.username.clone(),
                },
            ),
        )
        .await;
        dispatch(
            &self.notifier,
            Notice::new(
                &recipient.user,
                amount,
                NoticeKind::TransferReceived {
                    from_username: sender.user.username.clone(),
                },
            ),
        )
        .await;

        Ok(TransferResult {
            transaction,
            sender,
            recipient,
        })
    }

    // ========================
    // Loans
    // ========================

    /// Submit a loan request. Nothing is credited until it is approved.
    pub async fn request_loan(
        &self,
        ctx: &RequestContext,
        amount: Cents,
    ) -> Result<Transaction, AppError> {
        let customer = self.get_customer(ctx).await?;
        let amount = self.check(TransactionType::Loan, amount, &customer.account)?;

        let entry = match self
            .repo
            .request_loan(
                ctx.account_id,
                amount,
                ctx.received_at,
                self.limits.max_approved_loans,
            )
            .await?
        {
            Mutation::Applied(entry) => entry,
            Mutation::InsufficientFunds | Mutation::Unmatched | Mutation::BalanceOverflow => {
                return Err(self.reject(
                    TransactionType::Loan,
                    &customer.account,
                    Rejection::LoanLimitExceeded {
                        limit: self.limits.max_approved_loans,
                    },
                ));
            }
        };

        info!(
            account_no = customer.account.account_no,
            amount = %format_cents(amount),
            loan = %entry.id,
            "loan requested"
        );
        dispatch(
            &self.notifier,
            Notice::new(&customer.user, amount, NoticeKind::LoanRequest),
        )
        .await;

        Ok(entry)
    }

    /// Approve a pending loan and credit it to the borrower. This is the
    /// bank-side step; the borrower does not call it.
    pub async fn approve_loan(&self, loan_id: TransactionId) -> Result<Transaction, AppError> {
        let loan = self.load_loan(loan_id).await?;
        if loan.is_paid_loan() {
            return Err(Rejection::LoanAlreadyPaid.into());
        }
        if loan.loan_approve {
            return Err(Rejection::LoanAlreadyApproved.into());
        }

        let loan = match self.repo.approve_loan(loan_id).await? {
            Mutation::Applied(loan) => loan,
            Mutation::BalanceOverflow => return Err(Rejection::BalanceLimitExceeded.into()),
            Mutation::InsufficientFunds | Mutation::Unmatched => {
                return Err(Rejection::LoanAlreadyApproved.into());
            }
        };

        info!(
            loan = %loan.id,
            amount = %format_cents(loan.amount),
            balance = %format_cents(loan.balance_after_transaction),
            "loan approved"
        );
        if let Some(borrower) = self.repo.get_customer_by_account(loan.account_id).await? {
            dispatch(
                &self.notifier,
                Notice::new(&borrower.user, loan.amount, NoticeKind::LoanApproved),
            )
            .await;
        }

        Ok(loan)
    }

    /// Pay off one of the requester's approved loans from their balance.
    pub async fn pay_loan(
        &self,
        ctx: &RequestContext,
        loan_id: TransactionId,
    ) -> Result<Transaction, AppError> {
        let customer = self.get_customer(ctx).await?;
        let loan = self.load_loan(loan_id).await?;
        if loan.account_id != ctx.account_id {
            return Err(AppError::LoanNotFound(loan_id));
        }

        if !loan.loan_approve {
            return Err(self.reject(
                TransactionType::LoanPaid,
                &customer.account,
                Rejection::LoanNotApproved,
            ));
        }
        if loan.is_paid_loan() {
            return Err(self.reject(
                TransactionType::LoanPaid,
                &customer.account,
                Rejection::LoanAlreadyPaid,
            ));
        }
        if loan.amount >= customer.account.balance {
            return Err(self.reject(
                TransactionType::LoanPaid,
                &customer.account,
                Rejection::InsufficientFunds {
                    balance: customer.account.balance,
                    requested: loan.amount,
                },
            ));
        }

        let paid = match self.repo.pay_loan(loan_id).await? {
            Mutation::Applied(loan) => loan,
            // Another request flipped the loan first
            Mutation::Unmatched => return Err(Rejection::LoanAlreadyPaid.into()),
            Mutation::InsufficientFunds | Mutation::BalanceOverflow => {
                return Err(AppError::bank_insufficient_funds("loan payment"));
            }
        };

        info!(
            account_no = customer.account.account_no,
            loan = %paid.id,
            amount = %format_cents(paid.amount),
            balance = %format_cents(paid.balance_after_transaction),
            "loan paid"
        );
        dispatch(
            &self.notifier,
            Notice::new(&customer.user, paid.amount, NoticeKind::LoanPaid),
        )
        .await;

        Ok(paid)
    }

    /// The requester's loans, pending, approved and paid.
    pub async fn list_loans(&self, ctx: &RequestContext) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.list_loans(ctx.account_id).await?)
    }

    // ========================
    // Reports
    // ========================

    /// The requester's history, optionally limited to a date window.
    ///
    /// With a window, `balance` is the total of every account's transaction
    /// amounts in that window, and `account_total` the requester's share of
    /// it. Without one, `balance` is the current account balance.
    pub async fn transaction_report(
        &self,
        ctx: &RequestContext,
        window: Option<DateWindow>,
    ) -> Result<TransactionReport, AppError> {
        let customer = self.get_customer(ctx).await?;
        let transactions = self.repo.list_transactions(ctx.account_id, window).await?;

        let (balance, account_total) = match window {
            Some(w) => (
                self.repo.sum_amounts_between(w).await?,
                Some(
                    self.repo
                        .sum_account_amounts_between(ctx.account_id, w)
                        .await?,
                ),
            ),
            None => (customer.account.balance, None),
        };

        debug!(
            account_no = customer.account.account_no,
            count = transactions.len(),
            filtered = window.is_some(),
            "transaction report"
        );

        Ok(TransactionReport {
            account: customer.account,
            start_date: window.map(|w| w.start),
            end_date: window.map(|w| w.end),
            transactions,
            balance,
            account_total,
        })
    }

    /// Replay every account's history and compare it with stored balances.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let accounts = self.repo.list_accounts().await?;
        let history = self.repo.list_all_transactions().await?;
        Ok(build_integrity_report(&accounts, &history))
    }

    // ========================
    // Helpers
    // ========================

    fn check(
        &self,
        kind: TransactionType,
        amount: Cents,
        account: &Account,
    ) -> Result<Cents, AppError> {
        validate(kind, amount, account.balance, &self.limits)
            .map_err(|rejection| self.reject(kind, account, rejection))
    }

    fn reject(&self, kind: TransactionType, account: &Account, rejection: Rejection) -> AppError {
        warn!(
            account_no = account.account_no,
            kind = %kind,
            reason = %rejection,
            "request rejected"
        );
        AppError::Validation(rejection)
    }

    async fn load_loan(&self, loan_id: TransactionId) -> Result<Transaction, AppError> {
        match self.repo.get_transaction(loan_id).await? {
            Some(tx) if tx.transaction_type.is_loan() => Ok(tx),
            _ => Err(AppError::LoanNotFound(loan_id)),
        }
    }
}
