//! Delivery of finished video notes to chat users.
//!
//! [`Notifier`] is the seam the worker depends on; [`TelegramNotifier`]
//! implements it with the Bot API `sendVideoNote` method.

pub mod error;
pub mod notifier;
pub mod telegram;

pub use error::{NotifyError, NotifyResult};
pub use notifier::Notifier;
pub use telegram::{TelegramConfig, TelegramNotifier};
