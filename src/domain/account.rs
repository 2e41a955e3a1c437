use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type UserId = Uuid;
pub type AccountId = Uuid;

/// Account numbers are handed out sequentially starting here.
pub const FIRST_ACCOUNT_NO: i64 = 100_001;

/// A registered bank customer. Authentication lives outside this crate;
/// the username is the identity other users address transfers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}

/// The single bank account owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    /// Human-facing account number, assigned by the repository
    pub account_no: i64,
    /// Current balance in cents, never negative
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open an empty account for `user_id`. The account number is assigned on save.
    pub fn open(user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            account_no: 0,
            balance: 0,
            created_at: Utc::now(),
        }
    }

    pub fn can_cover(&self, amount: Cents) -> bool {
        amount <= self.balance
    }
}

/// An account together with its owner, as resolved from a username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub user: User,
    pub account: Account,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_is_empty() {
        let user = User::new("alice", "alice@example.com");
        let account = Account::open(user.id);
        assert_eq!(account.balance, 0);
        assert_eq!(account.user_id, user.id);
    }

    #[test]
    fn test_can_cover_is_inclusive() {
        let mut account = Account::open(Uuid::new_v4());
        account.balance = 50000;
        assert!(account.can_cover(50000));
        assert!(!account.can_cover(50001));
    }
}
