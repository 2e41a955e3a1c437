use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Cents, Transaction};

/// Rebuild an account's balance by replaying every entry that touches it.
/// Entries owned by other accounts only count when they are transfers
/// addressed to `account_id`.
pub fn replay_balance(account_id: AccountId, history: &[Transaction]) -> Cents {
    history
        .iter()
        .filter(|tx| tx.account_id == account_id || tx.recipient_account_id == Some(account_id))
        .map(|tx| tx.effect_on(account_id))
        .sum()
}

/// An account whose stored balance disagrees with its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub account_id: AccountId,
    pub account_no: i64,
    pub stored: Cents,
    pub replayed: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<AccountId>,
    pub dangling_recipients: usize,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.mismatches.is_empty()
            && self.negative_balances.is_empty()
            && self.dangling_recipients == 0
    }
}

/// Compare every account's stored balance with the one its history implies.
pub fn build_integrity_report(accounts: &[Account], history: &[Transaction]) -> IntegrityReport {
    let mismatches = accounts
        .iter()
        .filter_map(|account| {
            let replayed = replay_balance(account.id, history);
            (replayed != account.balance).then(|| BalanceMismatch {
                account_id: account.id,
                account_no: account.account_no,
                stored: account.balance,
                replayed,
            })
        })
        .collect();

    let negative_balances = accounts
        .iter()
        .filter(|a| a.balance < 0)
        .map(|a| a.id)
        .collect();

    let dangling_recipients = history
        .iter()
        .filter_map(|tx| tx.recipient_account_id)
        .filter(|recipient| !accounts.iter().any(|a| a.id == *recipient))
        .count();

    IntegrityReport {
        account_count: accounts.len(),
        transaction_count: history.len(),
        mismatches,
        negative_balances,
        dangling_recipients,
    }
}
