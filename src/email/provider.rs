use async_trait::async_trait;

use super::model::{FetchedMessage, MailboxDescriptor, MoveOutcome, SearchCriteria};
use crate::error::MailResult;

/// Protocol actions available on one authenticated mailbox session.
/// The IMAP implementation lives in `imap.rs`; tests substitute an in-memory store.
#[async_trait]
pub trait MailboxSession: Send {
    async fn list_mailboxes(&mut self) -> MailResult<Vec<MailboxDescriptor>>;

    /// Open a mailbox (EXAMINE when `read_only`, SELECT otherwise).
    /// Returns the number of messages it holds.
    async fn select(&mut self, mailbox: &str, read_only: bool) -> MailResult<u32>;

    /// UID, flags, envelope and internal date for a sequence-number set.
    async fn fetch_by_sequence(&mut self, sequence_set: &str) -> MailResult<Vec<FetchedMessage>>;

    /// UID, flags, envelope and internal date for a UID set.
    async fn fetch_by_uid(&mut self, uid_set: &str) -> MailResult<Vec<FetchedMessage>>;

    /// Like `fetch_by_uid` for one message, including its body structure.
    async fn fetch_with_structure(&mut self, uid: u32) -> MailResult<Option<FetchedMessage>>;

    /// Raw content of one section, or the whole body text when `part` is `None`.
    async fn download(&mut self, uid: u32, part: Option<&str>) -> MailResult<Vec<u8>>;

    /// UIDs matching every present criterion, in no particular order.
    async fn search(&mut self, criteria: &SearchCriteria) -> MailResult<Vec<u32>>;

    async fn move_message(&mut self, uid: u32, destination: &str) -> MailResult<MoveOutcome>;

    /// Flag as deleted and expunge. Returns whether the server confirmed removal.
    async fn delete_message(&mut self, uid: u32) -> MailResult<bool>;

    async fn logout(&mut self) -> MailResult<()>;
}

/// Opens fresh authenticated sessions. One session per operation; never pooled.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: MailboxSession;

    async fn open(&self) -> MailResult<Self::Session>;
}
