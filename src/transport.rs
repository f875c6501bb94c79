use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use tracing::info;

use crate::engine::Dataset;
use crate::message::{Batch, Value};

/// Outbound side of the companion link.
pub trait Transport {
  /// Ask the companion to fetch `dataset`.
  fn request_fetch(&mut self, dataset: Dataset) -> Result<()>;
}

/// Writes each outbound batch as one JSON line.
pub struct LineTransport<W: Write> {
  writer: W,
}

impl LineTransport<std::io::Stdout> {
  pub fn stdout() -> Self {
    Self::new(std::io::stdout())
  }
}

impl<W: Write> LineTransport<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn send(&mut self, batch: &Batch) -> Result<()> {
    let json = serde_json::to_string(batch).map_err(|e| eyre!("Failed to encode batch: {}", e))?;
    writeln!(self.writer, "{}", json).map_err(|e| eyre!("Failed to send batch: {}", e))?;
    self
      .writer
      .flush()
      .map_err(|e| eyre!("Failed to flush transport: {}", e))
  }
}

impl<W: Write> Transport for LineTransport<W> {
  fn request_fetch(&mut self, dataset: Dataset) -> Result<()> {
    info!(%dataset, "Requesting fetch");
    let batch = Batch::new().with(dataset.fetch_key(), Value::U8(1));
    self.send(&batch)
  }
}
