use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Sender address used in the `From` header and SMTP envelope.
    pub address: String,
    pub imap: ConnectionConfig,
    pub smtp: ConnectionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Transport security negotiation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// TLS from the first byte.
    #[default]
    Ssl,
    /// Plaintext greeting, then upgrade with STARTTLS.
    StartTls,
    None,
}

impl FromStr for Security {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssl" | "tls" => Ok(Security::Ssl),
            "starttls" => Ok(Security::StartTls),
            "none" | "plain" => Ok(Security::None),
            other => Err(format!("expected ssl, starttls or none, got '{}'", other)),
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Security::Ssl => write!(f, "ssl"),
            Security::StartTls => write!(f, "starttls"),
            Security::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Imap,
    Smtp,
}

impl Protocol {
    /// Port used when none is configured explicitly.
    pub fn default_port(self, security: Security) -> u16 {
        match (self, security) {
            (Protocol::Imap, Security::Ssl) => 993,
            (Protocol::Imap, Security::StartTls | Security::None) => 143,
            (Protocol::Smtp, Security::Ssl) => 465,
            (Protocol::Smtp, Security::StartTls) => 587,
            (Protocol::Smtp, Security::None) => 25,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub verify_certificates: bool,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("verify_certificates", &self.verify_certificates)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary key lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let address = get("EMAIL_ADDRESS").ok_or(ConfigError::Missing("EMAIL_ADDRESS"))?;
        let username = get("EMAIL_USERNAME").unwrap_or_else(|| address.clone());
        let password = get("EMAIL_PASSWORD").unwrap_or_default();
        let verify_certificates = match get("SSL_VERIFY") {
            Some(v) => parse_bool("SSL_VERIFY", &v)?,
            None => true,
        };
        let timeout = Duration::from_secs(parse_number(
            "MAIL_TIMEOUT_SECS",
            get("MAIL_TIMEOUT_SECS").as_deref(),
            30,
        )?);

        let imap_security = parse_security("IMAP_SECURITY", get("IMAP_SECURITY").as_deref())?;
        let smtp_security = parse_security("SMTP_SECURITY", get("SMTP_SECURITY").as_deref())?;

        if password.is_empty()
            && (imap_security != Security::None || smtp_security != Security::None)
        {
            return Err(ConfigError::Missing("EMAIL_PASSWORD"));
        }

        let connection = |protocol: Protocol,
                          host_key: &'static str,
                          port_key: &'static str,
                          security: Security|
         -> Result<ConnectionConfig, ConfigError> {
            let host = get(host_key).ok_or(ConfigError::Missing(host_key))?;
            let port = match get(port_key) {
                Some(p) => parse_port(port_key, &p)?,
                None => protocol.default_port(security),
            };
            Ok(ConnectionConfig {
                host,
                port,
                security,
                verify_certificates,
                username: username.clone(),
                password: password.clone(),
                timeout,
            })
        };

        let imap = connection(Protocol::Imap, "IMAP_HOST", "IMAP_PORT", imap_security)?;
        let smtp = connection(Protocol::Smtp, "SMTP_HOST", "SMTP_PORT", smtp_security)?;

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: match get("SERVER_PORT") {
                Some(p) => parse_port("SERVER_PORT", &p)?,
                None => 3000,
            },
        };

        Ok(Self {
            server,
            address,
            imap,
            smtp,
        })
    }
}

fn parse_security(key: &'static str, value: Option<&str>) -> Result<Security, ConfigError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|reason| ConfigError::Invalid { key, reason }),
        None => Ok(Security::default()),
    }
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::Invalid {
            key,
            reason: format!("'{}' is not a valid port", value),
        }),
        Ok(port) => Ok(port),
    }
}

fn parse_number(key: &'static str, value: Option<&str>, default: u64) -> Result<u64, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("'{}' is not a number", v),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected true or false, got '{}'", other),
        }),
    }
}
