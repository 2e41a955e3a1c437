// Application layer - use cases and orchestration over the repository

mod context;
pub mod error;
pub mod notify;
pub mod reporting;
mod service;

pub use context::*;
pub use error::*;
pub use notify::{LogNotifier, Notice, NoticeKind, Notifier, NotifyError};
pub use reporting::*;
pub use service::*;
