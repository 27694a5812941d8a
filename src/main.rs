mod api;
mod config;
mod email;
mod error;

use std::sync::Arc;

use config::AppConfig;
use email::client::MailClient;
use email::imap::ImapConnector;
use email::smtp::SmtpRelay;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub mail: Arc<MailClient<ImapConnector>>,
    pub relay: Arc<SmtpRelay>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!("mailbridge starting...");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("Account: {}", config.address);
    tracing::info!(
        "IMAP: {}:{} ({}), SMTP: {}:{} ({})",
        config.imap.host,
        config.imap.port,
        config.imap.security,
        config.smtp.host,
        config.smtp.port,
        config.smtp.security
    );
    if !config.imap.verify_certificates {
        tracing::warn!("TLS certificate verification is disabled");
    }

    let state = AppState {
        mail: Arc::new(MailClient::new(ImapConnector::new(Arc::new(
            config.imap.clone(),
        )))),
        relay: Arc::new(SmtpRelay::new(
            Arc::new(config.smtp.clone()),
            config.address.clone(),
        )),
    };

    // Build router
    let app = api::router::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("mailbridge tool API listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
