use futures::future::BoxFuture;

use super::format::{format_address_list, summarize};
use super::model::{
    DeleteResult, EmailPage, FetchedMessage, MailboxDescriptor, MessageDetail, MessageSummary,
    MoveResult, SearchCriteria,
};
use super::pagination::{sequence_set, sequence_window};
use super::provider::{MailboxSession, SessionFactory};
use super::search::{newest_uids, uid_set};
use super::structure::{collect_attachments, decode_part, find_first_part_of_type, BodyNode};
use crate::error::{MailError, MailResult};

pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_SEARCH_LIMIT: usize = 200;

/// Runs each mailbox operation on its own freshly opened session.
pub struct MailClient<F> {
    factory: F,
}

impl<F: SessionFactory> MailClient<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Open a session, run `op`, then log out whatever the outcome.
    /// A failed logout is logged and dropped; the session's socket closes on drop.
    async fn with_session<T, Op>(&self, op: Op) -> MailResult<T>
    where
        T: Send,
        Op: for<'s> FnOnce(&'s mut F::Session) -> BoxFuture<'s, MailResult<T>> + Send,
    {
        let mut session = self.factory.open().await?;
        let result = op(&mut session).await;
        if let Err(err) = session.logout().await {
            tracing::debug!("Ignoring IMAP logout failure: {}", err);
        }
        result
    }

    pub async fn list_mailboxes(&self) -> MailResult<Vec<MailboxDescriptor>> {
        self.with_session(|session| Box::pin(async move { session.list_mailboxes().await }))
            .await
    }

    pub async fn list_emails(
        &self,
        mailbox: &str,
        page: u32,
        page_size: u32,
    ) -> MailResult<EmailPage> {
        if page == 0 {
            return Err(MailError::InvalidArgument("page must be at least 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(MailError::InvalidArgument(format!(
                "pageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let mailbox = mailbox.to_string();
        self.with_session(move |session| Box::pin(page_of(session, mailbox, page, page_size)))
            .await
    }

    pub async fn fetch_email(&self, mailbox: &str, uid: u32) -> MailResult<MessageDetail> {
        let mailbox = mailbox.to_string();
        self.with_session(move |session| Box::pin(message_detail(session, mailbox, uid)))
            .await
    }

    pub async fn search_emails(
        &self,
        mailbox: &str,
        criteria: SearchCriteria,
        limit: usize,
    ) -> MailResult<Vec<MessageSummary>> {
        if limit == 0 || limit > MAX_SEARCH_LIMIT {
            return Err(MailError::InvalidArgument(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }
        let mailbox = mailbox.to_string();
        self.with_session(move |session| Box::pin(search_in(session, mailbox, criteria, limit)))
            .await
    }

    pub async fn move_email(
        &self,
        mailbox: &str,
        uid: u32,
        destination: &str,
    ) -> MailResult<MoveResult> {
        let mailbox = mailbox.to_string();
        let destination = destination.to_string();
        self.with_session(move |session| {
            Box::pin(move_between(session, mailbox, uid, destination))
        })
        .await
    }

    pub async fn delete_email(&self, mailbox: &str, uid: u32) -> MailResult<DeleteResult> {
        let mailbox = mailbox.to_string();
        self.with_session(move |session| Box::pin(delete_from(session, mailbox, uid)))
            .await
    }
}

fn newest_first(messages: &mut Vec<FetchedMessage>) {
    messages.sort_by(|a, b| b.uid.cmp(&a.uid));
    messages.dedup_by_key(|m| m.uid);
}

async fn page_of<S: MailboxSession>(
    session: &mut S,
    mailbox: String,
    page: u32,
    page_size: u32,
) -> MailResult<EmailPage> {
    let total = session.select(&mailbox, true).await?;
    let empty = EmailPage {
        total,
        page,
        page_size,
        emails: Vec::new(),
    };

    let Some(window) = sequence_window(total, page, page_size) else {
        return Ok(empty);
    };

    let mut messages = session.fetch_by_sequence(&sequence_set(&window)).await?;
    newest_first(&mut messages);

    Ok(EmailPage {
        emails: messages.iter().map(summarize).collect(),
        ..empty
    })
}

async fn message_detail<S: MailboxSession>(
    session: &mut S,
    mailbox: String,
    uid: u32,
) -> MailResult<MessageDetail> {
    session.select(&mailbox, true).await?;
    let message = session
        .fetch_with_structure(uid)
        .await?
        .ok_or_else(|| {
            MailError::NotFound(format!("Message with UID {} not found in {}", uid, mailbox))
        })?;

    let mut text_body = None;
    let mut html_body = None;
    let mut attachments = Vec::new();

    match &message.structure {
        Some(structure) => {
            if let Some(node) = find_first_part_of_type(structure, "text/plain") {
                text_body = Some(download_text(session, uid, node).await?);
            }
            if let Some(node) = find_first_part_of_type(structure, "text/html") {
                html_body = Some(download_text(session, uid, node).await?);
            }
            if text_body.is_none() && html_body.is_none() && structure.children.is_empty() {
                let text = download_text(session, uid, structure).await?;
                if structure.content_type == "text/html" {
                    html_body = Some(text);
                } else {
                    text_body = Some(text);
                }
            }
            attachments = collect_attachments(structure);
        }
        None => {
            let raw = session.download(uid, None).await?;
            text_body = Some(decode_part(&raw, None, None));
        }
    }

    let envelope = message.envelope.as_ref();
    Ok(MessageDetail {
        summary: summarize(&message),
        cc: envelope.and_then(|e| format_address_list(&e.cc)),
        message_id: envelope.and_then(|e| e.message_id.clone()),
        text_body,
        html_body,
        attachments,
    })
}

async fn download_text<S: MailboxSession>(
    session: &mut S,
    uid: u32,
    node: &BodyNode,
) -> MailResult<String> {
    let raw = session.download(uid, node.part.as_deref()).await?;
    Ok(decode_part(&raw, node.encoding.as_deref(), node.charset()))
}

async fn search_in<S: MailboxSession>(
    session: &mut S,
    mailbox: String,
    criteria: SearchCriteria,
    limit: usize,
) -> MailResult<Vec<MessageSummary>> {
    session.select(&mailbox, true).await?;
    let uids = session.search(&criteria).await?;
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let wanted = newest_uids(uids, limit);
    let mut messages = session.fetch_by_uid(&uid_set(&wanted)).await?;
    messages.retain(|m| wanted.binary_search(&m.uid).is_ok());
    newest_first(&mut messages);

    Ok(messages.iter().map(summarize).collect())
}

async fn move_between<S: MailboxSession>(
    session: &mut S,
    mailbox: String,
    uid: u32,
    destination: String,
) -> MailResult<MoveResult> {
    session.select(&mailbox, false).await?;
    let outcome = session.move_message(uid, &destination).await?;
    if !outcome.moved {
        return Err(MailError::Operation(format!(
            "Failed to move message {} from {} to {}",
            uid, mailbox, destination
        )));
    }

    let new_uid = outcome.new_uid_for(uid);
    tracing::info!(
        "Moved UID {} from {} to {} (new UID {:?})",
        uid,
        mailbox,
        destination,
        new_uid
    );

    Ok(MoveResult {
        uid,
        source_mailbox: mailbox,
        destination_mailbox: destination,
        new_uid,
    })
}

async fn delete_from<S: MailboxSession>(
    session: &mut S,
    mailbox: String,
    uid: u32,
) -> MailResult<DeleteResult> {
    session.select(&mailbox, false).await?;
    let deleted = session.delete_message(uid).await?;
    tracing::info!("Delete of UID {} in {}: {}", uid, mailbox, deleted);
    Ok(DeleteResult {
        uid,
        mailbox,
        deleted,
    })
}
