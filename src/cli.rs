//! Command line interface.

use std::path::PathBuf;

use callaudit_core::{EventKind, HttpMethod, RequestId};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Audited outbound API calls.
#[derive(Debug, Parser)]
#[command(name = "callaudit", version, about)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, env = "CALLAUDIT_CONFIG", default_value = crate::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the audit table and its indexes.
    Migrate,

    /// Perform one audited call and print the rows it produced.
    Call(CallArgs),

    /// Print stored audit rows as JSON lines.
    Query(QueryArgs),
}

/// HTTP method accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl From<Method> for HttpMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::Get,
            Method::Post => Self::Post,
        }
    }
}

/// Arguments for `call`.
#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// HTTP method.
    #[arg(value_enum)]
    pub method: Method,

    /// Absolute URL, or a path relative to `api_base_url`.
    pub endpoint: String,

    /// Request body for POST.
    #[arg(long)]
    pub payload: Option<String>,

    /// Keep audit rows in memory instead of PostgreSQL.
    #[arg(long)]
    pub ephemeral: bool,
}

/// Arguments for `query`. Exactly one selector is required.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct QueryArgs {
    /// Rows of one logical call.
    #[arg(long)]
    pub request_id: Option<String>,

    /// Rows of one kind (`INITIATED`, `SUCCESS`, `ERROR`, `RETRY_ERROR`).
    #[arg(long, value_parser = parse_event_kind)]
    pub kind: Option<EventKind>,

    /// Rows targeting one endpoint.
    #[arg(long)]
    pub endpoint: Option<String>,
}

/// Row selector resolved from [`QueryArgs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySelector {
    /// By correlation id.
    RequestId(RequestId),
    /// By row kind.
    Kind(EventKind),
    /// By endpoint.
    Endpoint(String),
}

impl QueryArgs {
    /// The selector the user asked for.
    ///
    /// # Errors
    ///
    /// Fails when no selector was given; clap's argument group normally
    /// prevents that.
    pub fn selector(&self) -> anyhow::Result<QuerySelector> {
        if let Some(id) = &self.request_id {
            return Ok(QuerySelector::RequestId(RequestId::from(id.as_str())));
        }
        if let Some(kind) = self.kind {
            return Ok(QuerySelector::Kind(kind));
        }
        if let Some(endpoint) = &self.endpoint {
            return Ok(QuerySelector::Endpoint(endpoint.clone()));
        }
        anyhow::bail!("one of --request-id, --kind or --endpoint is required")
    }
}

fn parse_event_kind(value: &str) -> Result<EventKind, String> {
    value.parse().map_err(|e: callaudit_core::CoreError| e.to_string())
}
