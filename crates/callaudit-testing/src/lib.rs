//! Test infrastructure for the audit pipeline.
//!
//! [`TestEnv`] runs the real dispatcher and listener against an in-memory
//! store with injectable faults, drives the client through a scripted
//! transport, and uses a virtual clock so backoff schedules complete
//! instantly. [`Invariants`] checks the audit trail every call must leave.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod env;
pub mod invariants;
pub mod store;
pub mod transport;

pub use callaudit_core::{MemoryAuditStore, TestClock};
pub use env::{TestEnv, TestEnvBuilder};
pub use invariants::Invariants;
pub use store::FaultyStore;
pub use transport::{RecordedCall, Reply, ScriptedTransport};

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
