use crate::buffer::Batch;
use crate::clock::{self, Clock, SystemClock};
use crate::config::Config;
use crate::http::{HttpTransport, ReqwestTransport, TransportError};
use crate::payload::{encode_send_array_payload, percent_encode, send_array_url};
use anyhow::{Context, Result};
use thiserror::Error;

const HTTP_OK: u16 = 200;

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("server returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was buffered; no request was made.
    Empty,
    Delivered { readings: usize },
    /// The buffer was cleared anyway; `batch` is what was lost unless the
    /// caller hands it back through [`BulkSender::requeue`].
    Failed { batch: Batch, error: FlushError },
}

impl FlushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, FlushOutcome::Delivered { .. })
    }
}

/// Buffers readings for one node and flushes them as a single SendArray GET.
pub struct BulkSender<T = ReqwestTransport, C = SystemClock> {
    server_url: String,
    node_id: String,
    buffer: Batch,
    transport: T,
    clock: C,
}

impl BulkSender {
    pub fn new(server_url: impl Into<String>, node_id: impl Into<String>) -> Result<Self> {
        let transport = ReqwestTransport::new(None).context("failed to build HTTP client")?;
        Ok(Self::with_parts(server_url, node_id, transport, SystemClock))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let transport =
            ReqwestTransport::new(config.http_timeout).context("failed to build HTTP client")?;
        Ok(Self::with_parts(
            config.server_url.clone(),
            config.node_id.clone(),
            transport,
            SystemClock,
        ))
    }
}

impl<T: HttpTransport, C: Clock> BulkSender<T, C> {
    pub fn with_parts(
        server_url: impl Into<String>,
        node_id: impl Into<String>,
        transport: T,
        clock: C,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            node_id: node_id.into(),
            buffer: Batch::new(),
            transport,
            clock,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Buffers `value` stamped with the current `HH:MM` local time.
    pub fn add_data(&mut self, value: f32) {
        let timestamp = clock::current_timestamp(&self.clock);
        self.add_data_at(value, timestamp);
    }

    pub fn add_data_at(&mut self, value: f32, timestamp: impl Into<String>) {
        let timestamp = timestamp.into();
        tracing::trace!(value, timestamp = %timestamp, "buffered reading");
        self.buffer.push(value, timestamp);
    }

    /// Flushes the buffer; `true` only for an HTTP 200. The buffer is empty afterwards
    /// whatever the outcome.
    pub fn send(&mut self) -> bool {
        self.flush().is_delivered()
    }

    pub fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }
        let batch = self.buffer.take();
        let readings = batch.len();

        match self.deliver(&batch) {
            Ok(()) => {
                tracing::debug!(node_id = %self.node_id, readings, "batch delivered");
                FlushOutcome::Delivered { readings }
            }
            Err(error) => {
                tracing::warn!(
                    node_id = %self.node_id,
                    readings,
                    error = %error,
                    "batch send failed; buffer cleared"
                );
                FlushOutcome::Failed { batch, error }
            }
        }
    }

    fn deliver(&self, batch: &Batch) -> Result<(), FlushError> {
        let json = encode_send_array_payload(&self.node_id, batch)?;
        let url = send_array_url(&self.server_url, &percent_encode(&json));
        tracing::debug!(url_len = url.len(), "sending batch");

        let status = self.transport.get(&url)?;
        if status != HTTP_OK {
            return Err(FlushError::Status(status));
        }
        Ok(())
    }

    /// Puts a failed batch back ahead of anything buffered since it was taken.
    pub fn requeue(&mut self, batch: Batch) {
        let mut restored = batch;
        restored.extend(self.buffer.take());
        self.buffer = restored;
    }

    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
    }

    pub fn count(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered(&self) -> &Batch {
        &self.buffer
    }
}
