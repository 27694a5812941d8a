use axum::{
    body::Bytes,
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::ToolError;
use super::tools::{ListEmailsArgs, MessageArgs, MoveEmailArgs, SearchEmailsArgs, TOOLS};
use crate::email::smtp::SendRequest;
use crate::AppState;

/// POST /tools/{name}
pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, ToolError> {
    let args = parse_arguments(&body)?;
    tracing::debug!("Tool {} called", name);

    match name.as_str() {
        "list_mailboxes" => respond(state.mail.list_mailboxes().await?),
        "list_emails" => {
            let args: ListEmailsArgs = arguments(args)?;
            respond(
                state
                    .mail
                    .list_emails(&args.mailbox, args.page, args.page_size)
                    .await?,
            )
        }
        "fetch_email" => {
            let args: MessageArgs = arguments(args)?;
            respond(state.mail.fetch_email(&args.mailbox, args.uid).await?)
        }
        "search_emails" => {
            let args: SearchEmailsArgs = arguments(args)?;
            let criteria = args.criteria()?;
            respond(
                state
                    .mail
                    .search_emails(&args.mailbox, criteria, args.limit)
                    .await?,
            )
        }
        "send_email" => {
            let request: SendRequest = arguments(args)?;
            respond(state.relay.send(request).await?)
        }
        "move_email" => {
            let args: MoveEmailArgs = arguments(args)?;
            if args.destination.trim().is_empty() {
                return Err(ToolError::InvalidArgument(
                    "destination must not be empty".into(),
                ));
            }
            respond(
                state
                    .mail
                    .move_email(&args.mailbox, args.uid, &args.destination)
                    .await?,
            )
        }
        "delete_email" => {
            let args: MessageArgs = arguments(args)?;
            respond(state.mail.delete_email(&args.mailbox, args.uid).await?)
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

/// GET /tools
pub async fn list_tools() -> impl IntoResponse {
    Json(TOOLS)
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// An empty body means no arguments; anything else must be a JSON object.
fn parse_arguments(body: &[u8]) -> Result<Value, ToolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_slice(body)? {
        Value::Null => Ok(Value::Object(Default::default())),
        value @ Value::Object(_) => Ok(value),
        _ => Err(ToolError::InvalidArgument(
            "Arguments must be a JSON object".into(),
        )),
    }
}

fn arguments<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    Ok(serde_json::from_value(args)?)
}

fn respond<T: Serialize>(value: T) -> Result<Response, ToolError> {
    Ok(Json(value).into_response())
}
