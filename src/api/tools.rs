//! Tool catalogue and argument types for the `/tools` surface.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use super::error::ToolError;
use crate::email::model::SearchCriteria;

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOLS: &[ToolInfo] = &[
    ToolInfo {
        name: "list_mailboxes",
        description: "List every mailbox with its hierarchy path, flags and special use",
    },
    ToolInfo {
        name: "list_emails",
        description: "Page through a mailbox, newest first",
    },
    ToolInfo {
        name: "fetch_email",
        description: "Fetch one message with its text and HTML bodies and attachment list",
    },
    ToolInfo {
        name: "search_emails",
        description: "Search a mailbox by sender, recipient, subject, date range, body text or seen state",
    },
    ToolInfo {
        name: "send_email",
        description: "Send a message through the configured SMTP relay",
    },
    ToolInfo {
        name: "move_email",
        description: "Move a message to another mailbox",
    },
    ToolInfo {
        name: "delete_email",
        description: "Permanently delete a message",
    },
];

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEmailsArgs {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Arguments addressing one message: `fetch_email` and `delete_email`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageArgs {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    pub uid: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEmailArgs {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    pub uid: u32,
    pub destination: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEmailsArgs {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub since_date: Option<String>,
    pub before_date: Option<String>,
    pub body: Option<String>,
    pub seen: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl SearchEmailsArgs {
    pub fn criteria(&self) -> Result<SearchCriteria, ToolError> {
        Ok(SearchCriteria {
            from: non_empty(&self.from),
            to: non_empty(&self.to),
            subject: non_empty(&self.subject),
            since: optional_date("sinceDate", &self.since_date)?,
            before: optional_date("beforeDate", &self.before_date)?,
            body: non_empty(&self.body),
            seen: self.seen,
        })
    }
}

#[allow(clippy::ref_option)]
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[allow(clippy::ref_option)]
fn optional_date(field: &str, value: &Option<String>) -> Result<Option<NaiveDate>, ToolError> {
    non_empty(value).map(|v| parse_date(field, &v)).transpose()
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| {
            ToolError::InvalidArgument(format!(
                "{} must be YYYY-MM-DD or RFC 3339, got '{}'",
                field, value
            ))
        })
}
