use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::Batch;

/// Host events
#[derive(Debug)]
pub enum Event {
  /// A delivered message batch from the companion
  Batch(Batch),
  /// The watch was shaken or tapped
  Shake,
  /// Periodic tick
  Tick,
  /// The inbound stream ended
  Closed,
}

/// Parse one line of inbound traffic. Blank lines yield nothing.
pub fn parse_line(line: &str) -> Option<Event> {
  let line = line.trim();
  if line.is_empty() {
    return None;
  }
  if line == "shake" {
    return Some(Event::Shake);
  }
  match serde_json::from_str::<Batch>(line) {
    Ok(batch) if batch.is_empty() => None,
    Ok(batch) => Some(Event::Batch(batch)),
    Err(e) => {
      warn!(error = %e, "Ignoring undecodable message");
      None
    }
  }
}

/// Event handler that produces events from inbound lines and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read events from stdin, ticking every `tick_rate`
  pub fn new(tick_rate: Duration) -> Self {
    Self::from_reader(BufReader::new(tokio::io::stdin()), tick_rate)
  }

  /// Read events from any line-oriented source
  pub fn from_reader<R>(reader: R, tick_rate: Duration) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn inbound message reader
    let line_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = reader.lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if let Some(event) = parse_line(&line) {
              if line_tx.send(event).is_err() {
                break;
              }
            }
          }
          Ok(None) => {
            let _ = line_tx.send(Event::Closed);
            break;
          }
          Err(e) => {
            warn!(error = %e, "Inbound stream failed");
            let _ = line_tx.send(Event::Closed);
            break;
          }
        }
      }
    });

    // Spawn tick timer; stops once the receiver is dropped
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      interval.tick().await;
      loop {
        interval.tick().await;
        if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
