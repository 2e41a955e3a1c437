use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Loan,
    LoanPaid,
    Transfer,
}

impl TransactionType {
    /// Stable numeric code stored in the ledger.
    pub fn code(&self) -> i64 {
        match self {
            TransactionType::Deposit => 1,
            TransactionType::Withdrawal => 2,
            TransactionType::Loan => 3,
            TransactionType::LoanPaid => 4,
            TransactionType::Transfer => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TransactionType::Deposit),
            2 => Some(TransactionType::Withdrawal),
            3 => Some(TransactionType::Loan),
            4 => Some(TransactionType::LoanPaid),
            5 => Some(TransactionType::Transfer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Loan => "loan",
            TransactionType::LoanPaid => "loan_paid",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn is_loan(&self) -> bool {
        matches!(self, TransactionType::Loan | TransactionType::LoanPaid)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of an account's history.
///
/// Entries are append-only. Loan entries are the exception: approval sets
/// `loan_approve`, payoff sets `loan_approved` and flips the type to
/// [`TransactionType::LoanPaid`]. Both refresh the balance snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Owning account (the sender, for transfers)
    pub account_id: AccountId,
    /// Amount in cents, always positive
    pub amount: Cents,
    pub transaction_type: TransactionType,
    /// When the request was received; never changes afterwards
    pub timestamp: DateTime<Utc>,
    /// Owning account's balance right after this entry was applied
    pub balance_after_transaction: Cents,
    /// Receiving account of a transfer
    pub recipient_account_id: Option<AccountId>,
    /// Loan is eligible for use and repayment
    pub loan_approve: bool,
    /// Loan has been paid off
    pub loan_approved: bool,
}

impl Transaction {
    /// Create an entry. The balance snapshot is filled in by the repository
    /// inside the same database transaction that moves the money.
    pub fn new(
        account_id: AccountId,
        transaction_type: TransactionType,
        amount: Cents,
        timestamp: DateTime<Utc>,
    ) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            transaction_type,
            timestamp,
            balance_after_transaction: 0,
            recipient_account_id: None,
            loan_approve: false,
            loan_approved: false,
        }
    }

    pub fn with_recipient(mut self, recipient: AccountId) -> Self {
        self.recipient_account_id = Some(recipient);
        self
    }

    pub fn is_paid_loan(&self) -> bool {
        self.transaction_type == TransactionType::LoanPaid
    }

    /// Signed effect of this entry on `account`'s balance.
    pub fn effect_on(&self, account: AccountId) -> Cents {
        match self.transaction_type {
            TransactionType::Deposit => self.amount,
            TransactionType::Withdrawal => -self.amount,
            // credited on approval, debited again on payoff
            TransactionType::LoanPaid => 0,
            TransactionType::Loan if self.loan_approve => self.amount,
            TransactionType::Loan => 0,
            TransactionType::Transfer if self.recipient_account_id == Some(account) => self.amount,
            TransactionType::Transfer => -self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_codes_roundtrip() {
        for tt in [
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Loan,
            TransactionType::LoanPaid,
            TransactionType::Transfer,
        ] {
            assert_eq!(TransactionType::from_code(tt.code()), Some(tt));
        }
        assert_eq!(TransactionType::from_code(0), None);
        assert_eq!(TransactionType::from_code(6), None);
    }

    #[test]
    fn test_transfer_effect_depends_on_side() {
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let tx = Transaction::new(sender, TransactionType::Transfer, 5000, Utc::now())
            .with_recipient(receiver);

        assert_eq!(tx.effect_on(sender), -5000);
        assert_eq!(tx.effect_on(receiver), 5000);
    }

    #[test]
    fn test_pending_loan_has_no_effect() {
        let account = Uuid::new_v4();
        let mut loan = Transaction::new(account, TransactionType::Loan, 100000, Utc::now());
        assert_eq!(loan.effect_on(account), 0);

        loan.loan_approve = true;
        assert_eq!(loan.effect_on(account), 100000);

        loan.transaction_type = TransactionType::LoanPaid;
        assert_eq!(loan.effect_on(account), 0);
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_transaction_requires_positive_amount() {
        Transaction::new(Uuid::new_v4(), TransactionType::Deposit, 0, Utc::now());
    }
}
