use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::structure::BodyNode;

/// One mailbox as reported by LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxDescriptor {
    /// Last segment of the hierarchy path.
    pub name: String,
    pub path: String,
    pub delimiter: Option<String>,
    pub flags: BTreeSet<String>,
    pub special_use: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub uid: u32,
    /// RFC 3339 when the header parses, the raw header value otherwise.
    pub date: Option<String>,
    pub from: Option<Vec<String>>,
    pub to: Option<Vec<String>>,
    pub subject: Option<String>,
    pub flags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub cc: Option<Vec<String>>,
    pub message_id: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub filename: Option<String>,
    pub size: Option<u32>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPage {
    pub total: u32,
    pub page: u32,
    pub page_size: u32,
    pub emails: Vec<MessageSummary>,
}

/// Search filters; absent fields impose no constraint, present fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub since: Option<chrono::NaiveDate>,
    pub before: Option<chrono::NaiveDate>,
    pub body: Option<String>,
    pub seen: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub uid: u32,
    pub source_mailbox: String,
    pub destination_mailbox: String,
    pub new_uid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub uid: u32,
    pub mailbox: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

/// An address as it appears in an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Decoded envelope fields of a fetched message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
}

/// Protocol-neutral view of one FETCH response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    pub envelope: Option<Envelope>,
    /// INTERNALDATE as RFC 3339.
    pub internal_date: Option<String>,
    pub structure: Option<BodyNode>,
}

/// What the server reported for a move request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MoveOutcome {
    pub moved: bool,
    /// Source and destination UIDs from a COPYUID response code, index aligned.
    pub uid_map: Option<(Vec<u32>, Vec<u32>)>,
}

impl MoveOutcome {
    /// Destination UID assigned to `uid`, if the server reported one.
    pub fn new_uid_for(&self, uid: u32) -> Option<u32> {
        let (source, destination) = self.uid_map.as_ref()?;
        let index = source.iter().position(|&u| u == uid)?;
        destination.get(index).copied()
    }
}
