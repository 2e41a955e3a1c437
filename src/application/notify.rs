//! Best-effort customer notifications.
//!
//! Notices are sent only after the balance mutation has committed. A failed
//! send is logged and otherwise ignored: it never rolls back or fails the
//! operation that triggered it.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Cents, User, format_cents};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to deliver notice to {to}: {reason}")]
    Delivery { to: String, reason: String },
}

/// What happened, from the point of view of the notified user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    Deposit,
    Withdrawal,
    LoanRequest,
    LoanApproved,
    LoanPaid,
    TransferSent { to_username: String },
    TransferReceived { from_username: String },
}

impl NoticeKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NoticeKind::Deposit => "Deposit Message",
            NoticeKind::Withdrawal => "Withdrawal Message",
            NoticeKind::LoanRequest => "Loan Request Message",
            NoticeKind::LoanApproved => "Loan Approval Message",
            NoticeKind::LoanPaid => "Loan Payment Message",
            NoticeKind::TransferSent { .. } | NoticeKind::TransferReceived { .. } => {
                "Money Transfer Notification"
            }
        }
    }

    fn body(&self, amount: Cents) -> String {
        let amount = format_cents(amount);
        match self {
            NoticeKind::Deposit => format!("{amount}$ was deposited to your account successfully."),
            NoticeKind::Withdrawal => {
                format!("Successfully withdrawn {amount}$ from your account.")
            }
            NoticeKind::LoanRequest => {
                format!("Loan request for {amount}$ submitted successfully.")
            }
            NoticeKind::LoanApproved => {
                format!("Your loan of {amount}$ was approved and credited to your account.")
            }
            NoticeKind::LoanPaid => format!("Your loan of {amount}$ has been paid off."),
            NoticeKind::TransferSent { to_username } => {
                format!("You have successfully transferred {amount}$ to {to_username}.")
            }
            NoticeKind::TransferReceived { from_username } => {
                format!("You have received {amount}$ from {from_username}.")
            }
        }
    }
}

/// A rendered message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Registered address of the recipient
    pub to: String,
    pub username: String,
    pub kind: NoticeKind,
    pub subject: String,
    pub body: String,
    pub amount: Cents,
}

impl Notice {
    pub fn new(user: &User, amount: Cents, kind: NoticeKind) -> Self {
        Self {
            to: user.email.clone(),
            username: user.username.clone(),
            subject: kind.subject().to_string(),
            body: kind.body(amount),
            kind,
            amount,
        }
    }
}

/// Capability to deliver a notice to a user's registered address.
///
/// Mail transport lives outside this crate; implement this trait over
/// whatever delivery service is available.
pub trait Notifier: Send + Sync {
    fn send(&self, notice: &Notice) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Writes notices to the log instead of delivering them.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        info!(
            to = %notice.to,
            username = %notice.username,
            subject = %notice.subject,
            "{}",
            notice.body
        );
        Ok(())
    }
}

/// Send a notice, logging failures instead of returning them.
pub(crate) async fn dispatch<N: Notifier>(notifier: &N, notice: Notice) {
    if let Err(e) = notifier.send(&notice).await {
        warn!(
            error = %e,
            to = %notice.to,
            subject = %notice.subject,
            "notification not delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::units;

    #[test]
    fn test_transfer_notices_differ_per_side() {
        let alice = User::new("alice", "alice@example.com");
        let bob = User::new("bob", "bob@example.com");

        let sent = Notice::new(
            &alice,
            units(500),
            NoticeKind::TransferSent {
                to_username: bob.username.clone(),
            },
        );
        let received = Notice::new(
            &bob,
            units(500),
            NoticeKind::TransferReceived {
                from_username: alice.username.clone(),
            },
        );

        assert_eq!(sent.to, "alice@example.com");
        assert_eq!(sent.body, "You have successfully transferred 500.00$ to bob.");
        assert_eq!(received.to, "bob@example.com");
        assert_eq!(received.body, "You have received 500.00$ from alice.");
        assert_eq!(sent.subject, received.subject);
    }

    #[test]
    fn test_deposit_notice() {
        let user = User::new("carol", "carol@example.com");
        let notice = Notice::new(&user, units(1500), NoticeKind::Deposit);
        assert_eq!(notice.subject, "Deposit Message");
        assert_eq!(notice.body, "1,500.00$ was deposited to your account successfully.");
    }
}
