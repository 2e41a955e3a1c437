use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Cents, TransactionType, format_cents, units};

/// Amount limits applied before any balance is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub min_deposit: Cents,
    pub min_withdrawal: Cents,
    pub max_withdrawal: Cents,
    /// Approved loans an account may hold before new requests are refused
    pub max_approved_loans: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_deposit: units(100),
            min_withdrawal: units(500),
            max_withdrawal: units(20_000),
            max_approved_loans: 3,
        }
    }
}

/// A user-correctable reason for refusing a request.
/// The display text is what the requester gets to see.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("{}", below_minimum_message(.kind, .minimum))]
    BelowMinimum {
        kind: TransactionType,
        minimum: Cents,
    },

    #[error("You can withdraw at most {} $", dollars(.maximum))]
    AboveMaximum { maximum: Cents },

    #[error("Insufficient balance. You have {} $ in your account", dollars(.balance))]
    InsufficientFunds { balance: Cents, requested: Cents },

    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Account with username '{0}' not found")]
    RecipientNotFound(String),

    #[error("You cannot transfer money to your own account")]
    SelfTransfer,

    #[error("You have reached the limit of {limit} approved loans")]
    LoanLimitExceeded { limit: i64 },

    #[error("Loan has not been approved yet")]
    LoanNotApproved,

    #[error("Loan has already been approved")]
    LoanAlreadyApproved,

    #[error("Loan has already been paid")]
    LoanAlreadyPaid,

    #[error("This amount would exceed the largest balance an account can hold")]
    BalanceLimitExceeded,
}

fn dollars(amount: &Cents) -> String {
    format_cents(*amount)
}

fn below_minimum_message(kind: &TransactionType, minimum: &Cents) -> String {
    match kind {
        TransactionType::Withdrawal => format!("You can withdraw at least {} $", dollars(minimum)),
        _ => format!("You need to deposit at least {} $", dollars(minimum)),
    }
}

/// Check a requested amount against the rules for its transaction kind.
///
/// `balance` is the account balance read at request time. It is advisory:
/// the repository re-checks funds atomically when the money actually moves.
/// Loans carry no amount bounds beyond being positive; their cap is a
/// count of approved loans, checked by the repository at submission.
pub fn validate(
    kind: TransactionType,
    amount: Cents,
    balance: Cents,
    limits: &Limits,
) -> Result<Cents, Rejection> {
    match kind {
        TransactionType::Deposit => {
            if amount < limits.min_deposit {
                return Err(Rejection::BelowMinimum {
                    kind,
                    minimum: limits.min_deposit,
                });
            }
        }
        TransactionType::Withdrawal => {
            if amount < limits.min_withdrawal {
                return Err(Rejection::BelowMinimum {
                    kind,
                    minimum: limits.min_withdrawal,
                });
            }
            if amount > limits.max_withdrawal {
                return Err(Rejection::AboveMaximum {
                    maximum: limits.max_withdrawal,
                });
            }
            if amount > balance {
                return Err(Rejection::InsufficientFunds {
                    balance,
                    requested: amount,
                });
            }
        }
        TransactionType::Transfer => {
            if amount <= 0 {
                return Err(Rejection::NonPositiveAmount);
            }
            if amount > balance {
                return Err(Rejection::InsufficientFunds {
                    balance,
                    requested: amount,
                });
            }
        }
        TransactionType::Loan | TransactionType::LoanPaid => {}
    }

    // Ledger entries are strictly positive whatever the configured limits
    if amount <= 0 {
        return Err(Rejection::NonPositiveAmount);
    }

    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn test_deposit_minimum_is_inclusive() {
        let below = validate(TransactionType::Deposit, units(100) - 1, 0, &limits());
        assert!(matches!(below, Err(Rejection::BelowMinimum { .. })));

        assert_eq!(
            validate(TransactionType::Deposit, units(100), 0, &limits()),
            Ok(units(100))
        );
    }

    #[test]
    fn test_deposit_ignores_balance() {
        assert!(validate(TransactionType::Deposit, units(1_000_000), 0, &limits()).is_ok());
    }

    #[test]
    fn test_withdrawal_bounds() {
        let balance = units(100_000);
        assert!(matches!(
            validate(TransactionType::Withdrawal, units(499), balance, &limits()),
            Err(Rejection::BelowMinimum { .. })
        ));
        assert!(validate(TransactionType::Withdrawal, units(500), balance, &limits()).is_ok());
        assert!(validate(TransactionType::Withdrawal, units(20_000), balance, &limits()).is_ok());
        assert_eq!(
            validate(TransactionType::Withdrawal, units(20_001), balance, &limits()),
            Err(Rejection::AboveMaximum {
                maximum: units(20_000)
            })
        );
    }

    #[test]
    fn test_withdrawal_insufficient_funds() {
        assert_eq!(
            validate(TransactionType::Withdrawal, units(600), units(500), &limits()),
            Err(Rejection::InsufficientFunds {
                balance: units(500),
                requested: units(600),
            })
        );
        assert!(validate(TransactionType::Withdrawal, units(500), units(500), &limits()).is_ok());
    }

    #[test]
    fn test_withdrawal_checks_minimum_before_funds() {
        // An empty account asking for too little hears about the minimum first
        assert!(matches!(
            validate(TransactionType::Withdrawal, units(10), 0, &limits()),
            Err(Rejection::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_transfer_rules() {
        assert_eq!(
            validate(TransactionType::Transfer, 0, units(100), &limits()),
            Err(Rejection::NonPositiveAmount)
        );
        assert_eq!(
            validate(TransactionType::Transfer, -5, units(100), &limits()),
            Err(Rejection::NonPositiveAmount)
        );
        assert!(matches!(
            validate(TransactionType::Transfer, units(101), units(100), &limits()),
            Err(Rejection::InsufficientFunds { .. })
        ));
        // No minimum for transfers
        assert_eq!(
            validate(TransactionType::Transfer, 1, units(100), &limits()),
            Ok(1)
        );
    }

    #[test]
    fn test_loans_pass_through() {
        assert_eq!(
            validate(TransactionType::Loan, units(1_000_000), 0, &limits()),
            Ok(units(1_000_000))
        );
    }

    #[test]
    fn test_zero_loan_is_rejected() {
        assert_eq!(
            validate(TransactionType::Loan, 0, 0, &limits()),
            Err(Rejection::NonPositiveAmount)
        );
    }

    #[test]
    fn test_rejection_messages() {
        let deposit = Rejection::BelowMinimum {
            kind: TransactionType::Deposit,
            minimum: units(100),
        };
        assert_eq!(deposit.to_string(), "You need to deposit at least 100.00 $");

        let withdraw = Rejection::BelowMinimum {
            kind: TransactionType::Withdrawal,
            minimum: units(500),
        };
        assert_eq!(withdraw.to_string(), "You can withdraw at least 500.00 $");

        let max = Rejection::AboveMaximum {
            maximum: units(20_000),
        };
        assert_eq!(max.to_string(), "You can withdraw at most 20,000.00 $");

        assert_eq!(
            Rejection::RecipientNotFound("bob".into()).to_string(),
            "Account with username 'bob' not found"
        );
    }
}
