//! Pluggable sinks for decoded frames.
//!
//! Sinks run inside the manager task, so a slow sink delays frame handling.
//! A sink error is logged and surfaced as a [`crate::SensorEvent::LogMessage`];
//! it never tears the connection down.

use async_trait::async_trait;

use vibemon_types::{DataFrame, StatusFrame};

use crate::error::Result;

/// Consumer of decoded frames, registered with the connection manager.
#[async_trait]
pub trait DataSink: Send {
    /// Name used in diagnostics when the sink fails.
    fn name(&self) -> &str;

    /// Called for every decoded data frame.
    async fn record_data(&mut self, frame: &DataFrame) -> Result<()>;

    /// Called for every decoded status frame.
    async fn record_status(&mut self, _status: &StatusFrame) -> Result<()> {
        Ok(())
    }
}

/// In-memory sink that keeps every frame it sees.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Data frames, oldest first.
    pub data: Vec<DataFrame>,
    /// Status frames, oldest first.
    pub status: Vec<StatusFrame>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record_data(&mut self, frame: &DataFrame) -> Result<()> {
        self.data.push(frame.clone());
        Ok(())
    }

    async fn record_status(&mut self, status: &StatusFrame) -> Result<()> {
        self.status.push(*status);
        Ok(())
    }
}
