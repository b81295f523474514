//! Batch buffer for scalar telemetry readings, flushed to a ThingsSentral
//! `SendArray` endpoint as one percent-encoded JSON GET per batch.
//!
//! ```no_run
//! use thingssentral_bulk::{configure_time, BulkSender, TimeConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! configure_time(&TimeConfig { tz_offset_hours: 8, ..TimeConfig::default() })?;
//! let mut sender = BulkSender::new("http://api.thingssentral.io", "N1")?;
//! sender.add_data(23.5);
//! sender.add_data_at(24.1, "14:31");
//! let delivered = sender.send();
//! assert_eq!(sender.count(), 0);
//! # let _ = delivered;
//! # Ok(())
//! # }
//! ```
pub mod buffer;
pub mod clock;
pub mod config;
pub mod http;
pub mod ntp;
pub mod payload;
pub mod sender;

pub use buffer::Batch;
pub use clock::{Clock, SystemClock, UNSYNCED_TIMESTAMP};
pub use config::Config;
pub use http::{HttpTransport, ReqwestTransport, TransportError};
pub use ntp::{
    configure_time, configure_time_with, is_synchronized, TimeConfig, TimeSource, TimeSyncError,
};
pub use sender::{BulkSender, FlushError, FlushOutcome};

use anyhow::Result;

/// Installs a fmt subscriber filtered by `RUST_LOG`, for hosts without their own.
pub fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,thingssentral_bulk=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
