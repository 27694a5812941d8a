//! Outbound delivery: compose with `mail-builder`, relay with lettre's SMTP connection.

use lettre::message::{Mailbox, Mailboxes};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use mail_builder::headers::address::Address as HeaderAddress;
use mail_builder::MessageBuilder;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::model::SendResult;
use crate::config::{ConnectionConfig, Security};
use crate::error::{MailError, MailResult};

/// A single address string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// RFC 5322 address-list form.
    fn joined(&self) -> String {
        match self {
            Recipients::One(addr) => addr.trim().to_string(),
            Recipients::Many(addrs) => addrs
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: Recipients,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Option<Recipients>,
    #[serde(default)]
    pub bcc: Option<Recipients>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub is_html: bool,
}

/// Serialized message plus its SMTP envelope.
struct Composed {
    message_id: String,
    sender: lettre::Address,
    recipients: Vec<lettre::Address>,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Delivery {
    accepted: Vec<String>,
    rejected: Vec<String>,
}

/// Sends through the configured relay. Every call opens its own connection.
pub struct SmtpRelay {
    config: Arc<ConnectionConfig>,
    sender: String,
}

impl SmtpRelay {
    pub fn new(config: Arc<ConnectionConfig>, sender: impl Into<String>) -> Self {
        Self {
            config,
            sender: sender.into(),
        }
    }

    pub async fn send(&self, request: SendRequest) -> MailResult<SendResult> {
        let composed = compose(&self.sender, &request)?;
        let message_id = format!("<{}>", composed.message_id);
        let config = self.config.clone();

        tracing::info!(
            "Relaying {} to {} recipient(s) via {}:{}",
            message_id,
            composed.recipients.len(),
            config.host,
            config.port
        );

        let delivery = tokio::task::spawn_blocking(move || deliver(&config, &composed))
            .await
            .map_err(|e| MailError::Send(format!("delivery task failed: {}", e)))??;

        tracing::info!(
            "Sent {}: {} accepted, {} rejected",
            message_id,
            delivery.accepted.len(),
            delivery.rejected.len()
        );

        Ok(SendResult {
            message_id,
            accepted: delivery.accepted,
            rejected: delivery.rejected,
        })
    }
}

fn parse_mailboxes(field: &str, recipients: Option<&Recipients>) -> MailResult<Vec<Mailbox>> {
    let joined = recipients.map(Recipients::joined).unwrap_or_default();
    if joined.is_empty() {
        return Ok(Vec::new());
    }
    joined
        .parse::<Mailboxes>()
        .map(|list| list.into_iter().collect())
        .map_err(|e| {
            MailError::InvalidArgument(format!("Invalid {} address '{}': {}", field, joined, e))
        })
}

fn header_address(mailbox: &Mailbox) -> HeaderAddress<'static> {
    HeaderAddress::new_address(mailbox.name.clone(), mailbox.email.to_string())
}

fn header_list(mailboxes: &[Mailbox]) -> HeaderAddress<'static> {
    HeaderAddress::new_list(mailboxes.iter().map(header_address).collect())
}

fn compose(from: &str, request: &SendRequest) -> MailResult<Composed> {
    let sender: Mailbox = from.parse().map_err(|e| {
        MailError::InvalidArgument(format!("Invalid sender address '{}': {}", from, e))
    })?;
    let to = parse_mailboxes("to", Some(&request.to))?;
    let cc = parse_mailboxes("cc", request.cc.as_ref())?;
    let bcc = parse_mailboxes("bcc", request.bcc.as_ref())?;
    let reply_to = request
        .reply_to
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| {
            r.parse::<Mailbox>().map_err(|e| {
                MailError::InvalidArgument(format!("Invalid replyTo address '{}': {}", r, e))
            })
        })
        .transpose()?;

    if to.is_empty() {
        return Err(MailError::InvalidArgument(
            "At least one 'to' recipient is required".into(),
        ));
    }

    let message_id = format!("{}@{}", Uuid::new_v4(), sender.email.domain());

    let mut builder = MessageBuilder::new()
        .from(header_address(&sender))
        .to(header_list(&to))
        .subject(request.subject.as_str())
        .message_id(message_id.as_str())
        .date(chrono::Utc::now().timestamp());
    if !cc.is_empty() {
        builder = builder.cc(header_list(&cc));
    }
    if let Some(reply_to) = &reply_to {
        builder = builder.reply_to(header_address(reply_to));
    }
    builder = if request.is_html {
        builder.html_body(request.body.as_str())
    } else {
        builder.text_body(request.body.as_str())
    };

    let bytes = builder
        .write_to_vec()
        .map_err(|e| MailError::Send(format!("Failed to build message: {}", e)))?;

    // Bcc only reaches the envelope.
    let recipients = to
        .iter()
        .chain(&cc)
        .chain(&bcc)
        .map(|mailbox| mailbox.email.clone())
        .collect();

    Ok(Composed {
        message_id,
        sender: sender.email,
        recipients,
        bytes,
    })
}

/// Sends QUIT and shuts the socket whenever the transaction ends.
struct ConnectionGuard(SmtpConnection);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn tls_parameters(config: &ConnectionConfig) -> MailResult<TlsParameters> {
    TlsParameters::builder(config.host.clone())
        .dangerous_accept_invalid_certs(!config.verify_certificates)
        .dangerous_accept_invalid_hostnames(!config.verify_certificates)
        .build()
        .map_err(|e| MailError::Send(format!("Invalid TLS setup: {}", e)))
}

fn deliver(config: &ConnectionConfig, message: &Composed) -> MailResult<Delivery> {
    let hello = ClientId::default();
    let tls = match config.security {
        Security::None => None,
        Security::Ssl | Security::StartTls => Some(tls_parameters(config)?),
    };
    let implicit_tls = tls.as_ref().filter(|_| config.security == Security::Ssl);

    let connection = SmtpConnection::connect(
        (config.host.as_str(), config.port),
        Some(config.timeout),
        &hello,
        implicit_tls,
        None,
    )
    .map_err(|e| {
        MailError::Send(format!(
            "Failed to connect to SMTP {}:{}: {}",
            config.host, config.port, e
        ))
    })?;
    let mut guard = ConnectionGuard(connection);
    let conn = &mut guard.0;

    if let (Security::StartTls, Some(tls)) = (config.security, tls.as_ref()) {
        conn.starttls(tls, &hello)
            .map_err(|e| MailError::Send(format!("STARTTLS failed: {}", e)))?;
    }

    // A plain relay that offers no AUTH (a local MTA) takes mail unauthenticated.
    let server = conn.server_info();
    let offers_auth = server.supports_auth_mechanism(Mechanism::Plain)
        || server.supports_auth_mechanism(Mechanism::Login);
    if config.has_credentials() && (config.security != Security::None || offers_auth) {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        conn.auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
            .map_err(|e| MailError::Send(format!("SMTP authentication failed: {}", e)))?;
    } else if config.has_credentials() {
        tracing::debug!("Relay {} offers no AUTH, sending unauthenticated", config.host);
    }

    conn.command(Mail::new(Some(message.sender.clone()), vec![]))
        .map_err(|e| MailError::Send(format!("Sender rejected: {}", e)))?;

    let mut delivery = Delivery::default();
    for recipient in &message.recipients {
        match conn.command(Rcpt::new(recipient.clone(), vec![])) {
            Ok(_) => delivery.accepted.push(recipient.to_string()),
            Err(e) if e.is_permanent() || e.is_transient() => {
                tracing::warn!("Recipient {} rejected: {}", recipient, e);
                delivery.rejected.push(recipient.to_string());
            }
            Err(e) => return Err(MailError::send(e)),
        }
    }

    if delivery.accepted.is_empty() {
        return Err(MailError::Send(format!(
            "All recipients rejected: {}",
            delivery.rejected.join(", ")
        )));
    }

    conn.command(Data)
        .map_err(|e| MailError::Send(format!("DATA refused: {}", e)))?;
    conn.message(&message.bytes)
        .map_err(|e| MailError::Send(format!("Message rejected: {}", e)))?;

    Ok(delivery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::time::Duration;

    fn plain_relay(port: u16, username: &str, password: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            security: Security::None,
            verify_certificates: true,
            username: username.to_string(),
            password: password.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Scripted relay on loopback for one connection. RCPT is refused for any
    /// address in `refused`; every command line is recorded.
    fn fake_relay(
        refused: &'static [&'static str],
        offer_auth: bool,
    ) -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();

        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut out = stream;
            let _ = out.write_all(b"220 relay.test ESMTP\r\n");

            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let command = line.trim_end().to_string();
                seen.lock().unwrap().push(command.clone());
                let verb = command.to_ascii_uppercase();

                let reply = if verb.starts_with("EHLO") || verb.starts_with("HELO") {
                    if offer_auth {
                        "250-relay.test\r\n250 AUTH PLAIN LOGIN\r\n"
                    } else {
                        "250-relay.test\r\n250 8BITMIME\r\n"
                    }
                } else if verb.starts_with("AUTH") {
                    "235 2.7.0 Authenticated\r\n"
                } else if verb.starts_with("MAIL") {
                    "250 2.1.0 Ok\r\n"
                } else if verb.starts_with("RCPT") {
                    if refused.iter().any(|r| command.contains(r)) {
                        "550 5.1.1 No such user\r\n"
                    } else {
                        "250 2.1.5 Ok\r\n"
                    }
                } else if verb.starts_with("DATA") {
                    let _ = out.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n");
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == ".\r\n" {
                            break;
                        }
                    }
                    seen.lock().unwrap().push("<message>".to_string());
                    "250 2.0.0 Queued\r\n"
                } else if verb.starts_with("QUIT") {
                    let _ = out.write_all(b"221 2.0.0 Bye\r\n");
                    break;
                } else {
                    "502 5.5.2 Unrecognized\r\n"
                };
                let _ = out.write_all(reply.as_bytes());
            }
        });

        (port, log)
    }

    fn commands(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn request(to: Recipients) -> SendRequest {
        SendRequest {
            to,
            subject: "Status".to_string(),
            body: "All systems nominal".to_string(),
            cc: None,
            bcc: None,
            reply_to: None,
            is_html: false,
        }
    }

    #[test]
    fn test_recipients_accept_string_or_list() {
        let one: Recipients = serde_json::from_str(r#""a@x.com""#).unwrap();
        let many: Recipients = serde_json::from_str(r#"["a@x.com", "Jane <jane@x.com>"]"#).unwrap();
        assert_eq!(one.joined(), "a@x.com");
        assert_eq!(many.joined(), "a@x.com, Jane <jane@x.com>");
    }

    #[test]
    fn test_send_request_defaults() {
        let req: SendRequest =
            serde_json::from_str(r#"{"to": "a@x.com", "subject": "s", "body": "b"}"#).unwrap();
        assert!(!req.is_html);
        assert!(req.cc.is_none());
        assert!(req.reply_to.is_none());
    }

    #[test]
    fn test_envelope_includes_bcc_but_headers_do_not() {
        let mut req = request(Recipients::Many(vec![
            "a@x.com".to_string(),
            "Jane <jane@x.com>".to_string(),
        ]));
        req.cc = Some(Recipients::One("c@x.com".to_string()));
        req.bcc = Some(Recipients::One("hidden@x.com".to_string()));

        let composed = compose("me@example.com", &req).unwrap();
        let recipients: Vec<String> = composed.recipients.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            recipients,
            vec!["a@x.com", "jane@x.com", "c@x.com", "hidden@x.com"]
        );

        let text = String::from_utf8_lossy(&composed.bytes);
        assert!(text.contains("jane@x.com"));
        assert!(text.contains("c@x.com"));
        assert!(!text.contains("hidden@x.com"));
        assert!(text.contains("All systems nominal"));
        assert_eq!(composed.sender.to_string(), "me@example.com");
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        let req = request(Recipients::One("a@x.com".into()));
        let composed = compose("me@example.com", &req).unwrap();
        assert!(composed.message_id.ends_with("@example.com"));
        let text = String::from_utf8_lossy(&composed.bytes);
        assert!(text.contains(&format!("<{}>", composed.message_id)));
    }

    #[test]
    fn test_html_body_only_in_html_slot() {
        let mut req = request(Recipients::One("a@x.com".into()));
        req.body = "<p>Hi</p>".to_string();
        req.is_html = true;
        let composed = compose("me@example.com", &req).unwrap();
        let text = String::from_utf8_lossy(&composed.bytes).into_owned();
        assert!(text.contains("text/html"));
        assert!(!text.contains("text/plain"));
    }

    #[test]
    fn test_invalid_and_empty_recipients() {
        let err = compose("me@example.com", &request(Recipients::One("not an address".into())));
        assert!(matches!(err, Err(MailError::InvalidArgument(_))));

        let err = compose("me@example.com", &request(Recipients::Many(vec![])));
        assert!(matches!(err, Err(MailError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_send_error() {
        let relay = SmtpRelay::new(Arc::new(plain_relay(1, "", "")), "me@example.com");
        let result = relay.send(request(Recipients::One("a@x.com".into()))).await;
        assert!(matches!(result, Err(MailError::Send(_))));
    }

    #[tokio::test]
    async fn test_partial_delivery_reports_each_recipient() {
        let (port, log) = fake_relay(&["bad@x.com"], false);
        let relay = SmtpRelay::new(Arc::new(plain_relay(port, "", "")), "me@example.com");
        let to = Recipients::Many(vec!["ok@x.com".to_string(), "bad@x.com".to_string()]);

        let result = relay.send(request(to)).await.unwrap();
        assert_eq!(result.accepted, vec!["ok@x.com"]);
        assert_eq!(result.rejected, vec!["bad@x.com"]);
        assert!(result.message_id.starts_with('<') && result.message_id.ends_with("@example.com>"));
        assert!(commands(&log).contains(&"<message>".to_string()));
    }

    #[tokio::test]
    async fn test_every_recipient_rejected_skips_data() {
        let (port, log) = fake_relay(&["bad@x.com"], false);
        let relay = SmtpRelay::new(Arc::new(plain_relay(port, "", "")), "me@example.com");

        let result = relay.send(request(Recipients::One("bad@x.com".into()))).await;
        match result {
            Err(MailError::Send(message)) => assert!(message.contains("bad@x.com")),
            other => panic!("expected a send error, got {:?}", other),
        }
        assert!(!commands(&log).iter().any(|c| c.starts_with("DATA")));
    }

    #[tokio::test]
    async fn test_plain_relay_without_auth_sends_unauthenticated() {
        let (port, log) = fake_relay(&[], false);
        let relay = SmtpRelay::new(Arc::new(plain_relay(port, "me", "secret")), "me@example.com");

        let result = relay.send(request(Recipients::One("a@x.com".into()))).await.unwrap();
        assert_eq!(result.accepted, vec!["a@x.com"]);
        assert!(!commands(&log).iter().any(|c| c.starts_with("AUTH")));
    }

    #[tokio::test]
    async fn test_plain_relay_offering_auth_gets_credentials() {
        let (port, log) = fake_relay(&[], true);
        let relay = SmtpRelay::new(Arc::new(plain_relay(port, "me", "secret")), "me@example.com");

        relay.send(request(Recipients::One("a@x.com".into()))).await.unwrap();
        assert!(commands(&log).iter().any(|c| c.starts_with("AUTH")));
    }
}
