use chrono::{DateTime, Utc};

use crate::domain::AccountId;

/// The resolved requester of an operation.
///
/// Authentication happens before this crate is involved; the caller hands
/// over the account it acts for and when the request arrived. Every entry
/// the request creates is stamped with `received_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub account_id: AccountId,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            received_at: Utc::now(),
        }
    }

    /// Same requester, different arrival time.
    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}
