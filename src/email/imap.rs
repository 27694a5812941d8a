use async_imap::types::{Capabilities, Fetch, Flag, Name};
use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use imap_proto::types::{
    Address, BodyContentCommon, BodyContentSinglePart, BodyStructure, ContentEncoding,
    MessageSection, NameAttribute, Response, ResponseCode, SectionPath, Status, UidSetMember,
};
use std::borrow::Cow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::format::{decode_header_text, mailbox_descriptor};
use super::model::{
    EmailAddress, Envelope, FetchedMessage, MailboxDescriptor, MoveOutcome, SearchCriteria,
};
use super::provider::{MailboxSession, SessionFactory};
use super::search::build_query;
use super::structure::{number_parts, BodyNode};
use crate::config::{ConnectionConfig, Security};
use crate::error::{MailError, MailResult};

const SUMMARY_QUERY: &str = "(UID FLAGS ENVELOPE INTERNALDATE)";
const DETAIL_QUERY: &str = "(UID FLAGS ENVELOPE INTERNALDATE BODYSTRUCTURE)";

/// Wrapper for either TLS or Plain IMAP stream
enum StreamWrapper {
    Tls(TlsStream<Compat<TcpStream>>),
    Plain(Compat<TcpStream>),
}

impl AsyncRead for StreamWrapper {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_read(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StreamWrapper {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_write(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_flush(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_close(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_close(cx),
        }
    }
}

impl std::fmt::Debug for StreamWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamWrapper::Tls(_) => write!(f, "StreamWrapper::Tls"),
            StreamWrapper::Plain(_) => write!(f, "StreamWrapper::Plain"),
        }
    }
}

/// Opens authenticated IMAP sessions from the startup configuration.
#[derive(Clone)]
pub struct ImapConnector {
    config: Arc<ConnectionConfig>,
}

impl ImapConnector {
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self { config }
    }

    fn tls(&self) -> TlsConnector {
        let connector = TlsConnector::new();
        if self.config.verify_certificates {
            connector
        } else {
            connector
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
        }
    }

    async fn tcp(&self) -> MailResult<TcpStream> {
        let (host, port) = (self.config.host.as_str(), self.config.port);
        tokio::time::timeout(self.config.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                MailError::Connection(format!("Timed out connecting to IMAP {}:{}", host, port))
            })?
            .map_err(|e| {
                MailError::Connection(format!("Failed to connect to IMAP {}:{}: {}", host, port, e))
            })
    }

    async fn stream(&self) -> MailResult<StreamWrapper> {
        let tcp = self.tcp().await?;
        let host = self.config.host.as_str();

        match self.config.security {
            Security::Ssl => {
                tracing::debug!("Using IMAPS (TLS)");
                let tls_stream = self
                    .tls()
                    .connect(host, tcp.compat())
                    .await
                    .map_err(|e| MailError::Connection(format!("TLS handshake failed: {}", e)))?;
                Ok(StreamWrapper::Tls(tls_stream))
            }
            Security::StartTls => {
                tracing::debug!("Using IMAP with STARTTLS");
                let mut client = async_imap::Client::new(tcp.compat());
                client
                    .read_response()
                    .await
                    .transpose()
                    .map_err(|e| {
                        MailError::Connection(format!("Failed to read IMAP greeting: {}", e))
                    })?
                    .ok_or_else(|| {
                        MailError::Connection("IMAP server closed the connection".into())
                    })?;
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| MailError::Connection(format!("STARTTLS refused: {}", e)))?;
                let tls_stream = self
                    .tls()
                    .connect(host, client.into_inner())
                    .await
                    .map_err(|e| MailError::Connection(format!("TLS handshake failed: {}", e)))?;
                Ok(StreamWrapper::Tls(tls_stream))
            }
            Security::None => {
                tracing::debug!("Using plain IMAP");
                Ok(StreamWrapper::Plain(tcp.compat()))
            }
        }
    }
}

#[async_trait]
impl SessionFactory for ImapConnector {
    type Session = ImapSession;

    async fn open(&self) -> MailResult<ImapSession> {
        tracing::info!(
            "Connecting to IMAP {}:{} ({})",
            self.config.host,
            self.config.port,
            self.config.security
        );

        let stream = self.stream().await?;
        let client = async_imap::Client::new(stream);
        let session = client
            .login(&self.config.username, &self.config.password)
            .await
            .map_err(|(err, _)| MailError::Connection(format!("IMAP login failed: {}", err)))?;

        tracing::info!("IMAP login successful for {}", self.config.username);
        Ok(ImapSession { session })
    }
}

/// One authenticated IMAP connection. Dropping it closes the socket.
pub struct ImapSession {
    session: async_imap::Session<StreamWrapper>,
}

struct TaggedReply {
    ok: bool,
    information: Option<String>,
    copy_uid: Option<(Vec<u32>, Vec<u32>)>,
}

impl ImapSession {
    /// Run a raw command and read responses up to its tagged completion,
    /// keeping any COPYUID response code seen on the way.
    async fn tagged(&mut self, command: &str) -> MailResult<TaggedReply> {
        let tag = self
            .session
            .run_command(command)
            .await
            .map_err(MailError::protocol)?;

        let mut copy_uid = None;
        loop {
            let response = self
                .session
                .read_response()
                .await
                .transpose()
                .map_err(MailError::protocol)?
                .ok_or_else(|| {
                    MailError::Connection("IMAP server closed the connection".into())
                })?;

            match response.parsed() {
                Response::Data {
                    code: Some(ResponseCode::CopyUid(_, source, destination)),
                    ..
                } => {
                    copy_uid = Some((expand_uid_set(&source), expand_uid_set(&destination)));
                }
                Response::Done {
                    tag: done,
                    status,
                    code,
                    information,
                } if done == &tag => {
                    if let Some(ResponseCode::CopyUid(_, source, destination)) = code {
                        copy_uid = Some((expand_uid_set(&source), expand_uid_set(&destination)));
                    }
                    let information = information.as_ref().map(|i| i.to_string());
                    if matches!(status, Status::Bad) {
                        return Err(MailError::Protocol(format!(
                            "{} rejected: {}",
                            command,
                            information.unwrap_or_default()
                        )));
                    }
                    return Ok(TaggedReply {
                        ok: matches!(status, Status::Ok),
                        information,
                        copy_uid,
                    });
                }
                _ => {}
            }
        }
    }

    async fn has_capability(&mut self, name: &str) -> MailResult<bool> {
        Ok(self.capabilities().await?.has_str(name))
    }

    async fn capabilities(&mut self) -> MailResult<Capabilities> {
        self.session
            .capabilities()
            .await
            .map_err(MailError::protocol)
    }

    /// Flag as `\Deleted`; returns whether the server echoed the message back.
    async fn mark_deleted(&mut self, uid: u32) -> MailResult<bool> {
        let updates: Vec<Fetch> = self
            .session
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .await
            .map_err(MailError::protocol)?
            .try_collect()
            .await
            .map_err(MailError::protocol)?;
        Ok(!updates.is_empty())
    }

    /// Expunge one UID (UIDPLUS) or every `\Deleted` message without it.
    async fn expunge(&mut self, uid: u32) -> MailResult<Vec<u32>> {
        if self.has_capability("UIDPLUS").await? {
            self.session
                .uid_expunge(uid.to_string())
                .await
                .map_err(MailError::protocol)?
                .try_collect()
                .await
                .map_err(MailError::protocol)
        } else {
            self.session
                .expunge()
                .await
                .map_err(MailError::protocol)?
                .try_collect()
                .await
                .map_err(MailError::protocol)
        }
    }

    async fn fetch(
        &mut self,
        sequence_set: &str,
        by_uid: bool,
        query: &str,
    ) -> MailResult<Vec<FetchedMessage>> {
        let fetches: Vec<Fetch> = if by_uid {
            self.session
                .uid_fetch(sequence_set, query)
                .await
                .map_err(MailError::protocol)?
                .try_collect()
                .await
                .map_err(MailError::protocol)?
        } else {
            self.session
                .fetch(sequence_set, query)
                .await
                .map_err(MailError::protocol)?
                .try_collect()
                .await
                .map_err(MailError::protocol)?
        };
        Ok(fetches.iter().filter_map(fetched_message).collect())
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn list_mailboxes(&mut self) -> MailResult<Vec<MailboxDescriptor>> {
        let names: Vec<Name> = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(MailError::protocol)?
            .try_collect()
            .await
            .map_err(MailError::protocol)?;

        Ok(names
            .iter()
            .map(|name| {
                mailbox_descriptor(
                    name.name(),
                    name.delimiter(),
                    name.attributes().iter().map(attribute_name).collect(),
                )
            })
            .collect())
    }

    async fn select(&mut self, mailbox: &str, read_only: bool) -> MailResult<u32> {
        let selected = if read_only {
            self.session.examine(mailbox).await
        } else {
            self.session.select(mailbox).await
        }
        .map_err(|e| MailError::Protocol(format!("Failed to open mailbox {}: {}", mailbox, e)))?;
        tracing::info!(
            "Opened {} ({}, {} messages)",
            mailbox,
            if read_only { "read-only" } else { "read-write" },
            selected.exists
        );
        Ok(selected.exists)
    }

    async fn fetch_by_sequence(&mut self, sequence_set: &str) -> MailResult<Vec<FetchedMessage>> {
        self.fetch(sequence_set, false, SUMMARY_QUERY).await
    }

    async fn fetch_by_uid(&mut self, uid_set: &str) -> MailResult<Vec<FetchedMessage>> {
        self.fetch(uid_set, true, SUMMARY_QUERY).await
    }

    async fn fetch_with_structure(&mut self, uid: u32) -> MailResult<Option<FetchedMessage>> {
        let messages = self.fetch(&uid.to_string(), true, DETAIL_QUERY).await?;
        Ok(messages.into_iter().find(|m| m.uid == uid))
    }

    async fn download(&mut self, uid: u32, part: Option<&str>) -> MailResult<Vec<u8>> {
        let (query, path) = match part {
            Some(part) => (format!("BODY.PEEK[{}]", part), section_path(part)?),
            None => (
                "BODY.PEEK[TEXT]".to_string(),
                SectionPath::Full(MessageSection::Text),
            ),
        };

        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(uid.to_string(), &query)
            .await
            .map_err(MailError::protocol)?
            .try_collect()
            .await
            .map_err(MailError::protocol)?;

        fetches
            .iter()
            .find_map(|fetch| fetch.section(&path).map(<[u8]>::to_vec))
            .ok_or_else(|| {
                MailError::Protocol(format!(
                    "No content returned for {} of UID {}",
                    query, uid
                ))
            })
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> MailResult<Vec<u32>> {
        let capabilities = self.capabilities().await?;
        let literals = capabilities.has_str("LITERAL+") || capabilities.has_str("LITERAL-");
        let query = build_query(criteria, literals);
        tracing::debug!("UID SEARCH {}", query);
        let uids = self
            .session
            .uid_search(&query)
            .await
            .map_err(MailError::protocol)?;
        Ok(uids.into_iter().collect())
    }

    async fn move_message(&mut self, uid: u32, destination: &str) -> MailResult<MoveOutcome> {
        let target = quote_mailbox(destination);

        if self.has_capability("MOVE").await? {
            let reply = self.tagged(&format!("UID MOVE {} {}", uid, target)).await?;
            if !reply.ok {
                tracing::warn!(
                    "UID MOVE {} refused: {}",
                    uid,
                    reply.information.unwrap_or_default()
                );
            }
            return Ok(MoveOutcome {
                moved: reply.ok,
                uid_map: reply.copy_uid,
            });
        }

        tracing::debug!("Server lacks MOVE, using COPY + STORE + EXPUNGE");
        let reply = self.tagged(&format!("UID COPY {} {}", uid, target)).await?;
        if !reply.ok {
            tracing::warn!(
                "UID COPY {} refused: {}",
                uid,
                reply.information.unwrap_or_default()
            );
            return Ok(MoveOutcome::default());
        }
        self.mark_deleted(uid).await?;
        self.expunge(uid).await?;
        Ok(MoveOutcome {
            moved: true,
            uid_map: reply.copy_uid,
        })
    }

    async fn delete_message(&mut self, uid: u32) -> MailResult<bool> {
        if !self.mark_deleted(uid).await? {
            return Ok(false);
        }
        let expunged = self.expunge(uid).await?;
        Ok(!expunged.is_empty())
    }

    async fn logout(&mut self) -> MailResult<()> {
        self.session.logout().await.map_err(MailError::protocol)
    }
}

fn fetched_message(fetch: &Fetch) -> Option<FetchedMessage> {
    let uid = fetch.uid?;
    Some(FetchedMessage {
        uid,
        flags: fetch.flags().map(|flag| flag_name(&flag)).collect(),
        envelope: fetch.envelope().map(|envelope| Envelope {
            date: envelope.date.as_deref().map(lossy),
            subject: envelope.subject.as_deref().map(decode_header_text),
            message_id: envelope.message_id.as_deref().map(lossy),
            from: addresses(envelope.from.as_deref()),
            to: addresses(envelope.to.as_deref()),
            cc: addresses(envelope.cc.as_deref()),
        }),
        internal_date: fetch
            .internal_date()
            .map(|d| d.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)),
        structure: fetch.bodystructure().map(|structure| {
            let mut root = body_node(structure);
            number_parts(&mut root);
            root
        }),
    })
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn flag_name(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

fn attribute_name(attribute: &NameAttribute<'_>) -> String {
    match attribute {
        NameAttribute::NoInferiors => "\\Noinferiors".to_string(),
        NameAttribute::NoSelect => "\\Noselect".to_string(),
        NameAttribute::Marked => "\\Marked".to_string(),
        NameAttribute::Unmarked => "\\Unmarked".to_string(),
        NameAttribute::All => "\\All".to_string(),
        NameAttribute::Archive => "\\Archive".to_string(),
        NameAttribute::Drafts => "\\Drafts".to_string(),
        NameAttribute::Flagged => "\\Flagged".to_string(),
        NameAttribute::Junk => "\\Junk".to_string(),
        NameAttribute::Sent => "\\Sent".to_string(),
        NameAttribute::Trash => "\\Trash".to_string(),
        NameAttribute::Extension(name) => name.to_string(),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

/// Group start/end markers (no host or no mailbox) are skipped.
fn addresses(list: Option<&[Address<'_>]>) -> Vec<EmailAddress> {
    list.unwrap_or_default()
        .iter()
        .filter_map(|addr| {
            let mailbox = addr.mailbox.as_deref().map(lossy)?;
            let host = addr.host.as_deref().map(lossy)?;
            Some(EmailAddress {
                name: addr
                    .name
                    .as_deref()
                    .map(decode_header_text)
                    .filter(|n| !n.is_empty()),
                address: Some(format!("{}@{}", mailbox, host)),
            })
        })
        .collect()
}

fn body_node(structure: &BodyStructure<'_>) -> BodyNode {
    match structure {
        BodyStructure::Basic { common, other, .. } | BodyStructure::Text { common, other, .. } => {
            node(common, Some(other), Vec::new())
        }
        BodyStructure::Message {
            common,
            other,
            body,
            ..
        } => node(common, Some(other), vec![body_node(body)]),
        BodyStructure::Multipart { common, bodies, .. } => {
            node(common, None, bodies.iter().map(body_node).collect())
        }
    }
}

fn node(
    common: &BodyContentCommon<'_>,
    single: Option<&BodyContentSinglePart<'_>>,
    children: Vec<BodyNode>,
) -> BodyNode {
    let disposition = common.disposition.as_ref();
    BodyNode {
        content_type: format!("{}/{}", common.ty.ty, common.ty.subtype).to_ascii_lowercase(),
        part: None,
        size: single.map(|s| s.octets),
        encoding: single.map(|s| encoding_name(&s.transfer_encoding)),
        disposition: disposition.map(|d| d.ty.to_ascii_lowercase()),
        disposition_params: disposition.map(|d| params(&d.params)).unwrap_or_default(),
        params: params(&common.ty.params),
        children,
    }
}

#[allow(clippy::ref_option)]
fn params(list: &Option<Vec<(Cow<'_, str>, Cow<'_, str>)>>) -> Vec<(String, String)> {
    list.iter()
        .flatten()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn encoding_name(encoding: &ContentEncoding<'_>) -> String {
    match encoding {
        ContentEncoding::SevenBit => "7bit".to_string(),
        ContentEncoding::EightBit => "8bit".to_string(),
        ContentEncoding::Binary => "binary".to_string(),
        ContentEncoding::Base64 => "base64".to_string(),
        ContentEncoding::QuotedPrintable => "quoted-printable".to_string(),
        ContentEncoding::Other(other) => other.to_ascii_lowercase(),
    }
}

fn section_path(part: &str) -> MailResult<SectionPath> {
    part.split('.')
        .map(|n| n.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map(|numbers| SectionPath::Part(numbers, None))
        .map_err(|_| MailError::InvalidArgument(format!("Invalid section identifier {}", part)))
}

fn expand_uid_set(members: &[UidSetMember]) -> Vec<u32> {
    members
        .iter()
        .flat_map(|member| match member {
            UidSetMember::Uid(uid) => *uid..=*uid,
            UidSetMember::UidRange(range) => range.clone(),
        })
        .collect()
}

fn quote_mailbox(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}
