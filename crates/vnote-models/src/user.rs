//! User records referenced by jobs.

use serde::{Deserialize, Serialize};

/// A user record. Only the fields the worker reads are modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    /// Telegram chat id; `0` when the user never talked to the bot
    #[serde(default)]
    pub tgid: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Number of delivered video notes
    #[serde(default)]
    pub circle_count: i64,

    #[serde(default)]
    pub coins: i64,
}

impl User {
    /// Chat id to deliver notes to, if the user has one.
    pub fn recipient(&self) -> Option<i64> {
        (self.tgid != 0).then_some(self.tgid)
    }
}
