//! Audited outbound HTTP client.
//!
//! [`AuditedClient`] performs GET and POST calls through a [`Transport`]
//! and publishes a lifecycle event around every attempt: `Initiated` once
//! per logical call, `Error` for each failed attempt, `Success` when an
//! attempt returns 2xx. An optional [`RetryPolicy`] owns the attempt loop
//! and every retry reuses the original request, so all events of one call
//! share a single request id.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use callaudit_client::{AuditedClient, ClientConfig, ReqwestTransport, RetryPolicy};
//! use callaudit_core::EventBus;
//!
//! # async fn example(bus: Arc<dyn EventBus>) -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReqwestTransport::new(ClientConfig::default())?;
//! let client = AuditedClient::builder(Arc::new(transport), bus)
//!     .retry_policy(RetryPolicy::default())
//!     .build();
//!
//! let response = client.post("https://api.example.com/orders", r#"{"item":"x"}"#).await?;
//! println!("{} {}", response.status_code(), response.data());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod handle;
pub mod retry;
pub mod transport;

pub use client::{AuditedClient, AuditedClientBuilder};
pub use error::{ClientError, ErrorCategory, TransportError};
pub use handle::CallHandle;
pub use retry::{BackoffStrategy, RetryContext, RetryDecision, RetryPolicy};
pub use transport::{ClientConfig, ReqwestTransport, Transport, TransportResponse};

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default read timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
