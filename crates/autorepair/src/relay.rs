//! Streaming output relay.
//!
//! A background task reads the remote command's output and pushes decoded
//! lines into a bounded channel; the caller pulls them off the other end.
//! Dropping the sender closes the pipe, so the consumer sees the end of the
//! sequence only after every buffered line has been delivered.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::error::{RepairError, Result};
use crate::exec::ExecStream;

/// Consumer end of the relay pipe.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::Receiver<String>,
}

impl OutputLines {
    /// Next line of output, or `None` once the producer has closed the pipe.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for OutputLines {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A running relay: the line stream and the producer task behind it.
#[derive(Debug)]
pub struct Relay {
    pub lines: OutputLines,
    producer: JoinHandle<Result<()>>,
}

impl Relay {
    /// Close the read side and wait for the producer to report how the
    /// remote command ended.
    ///
    /// A producer that panicked or was aborted surfaces as
    /// [`RepairError::RelayTaskFailed`].
    pub async fn finish(self) -> Result<()> {
        let Self { lines, producer } = self;
        drop(lines);

        match producer.await {
            Ok(result) => result,
            Err(e) => Err(RepairError::RelayTaskFailed(e.to_string())),
        }
    }
}

/// Start relaying `stream` through a channel holding at most `capacity` lines.
pub fn relay(stream: ExecStream, capacity: usize, token: CancellationToken) -> Relay {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let producer = tokio::spawn(produce(stream, tx, token).in_current_span());

    Relay {
        lines: OutputLines { rx },
        producer,
    }
}

async fn produce(
    stream: ExecStream,
    tx: mpsc::Sender<String>,
    token: CancellationToken,
) -> Result<()> {
    let ExecStream {
        output,
        mut process,
    } = stream;
    let mut segments = BufReader::new(output).split(b'\n');

    loop {
        let segment = tokio::select! {
            () = token.cancelled() => {
                process.abort();
                return Err(RepairError::Cancelled);
            }
            segment = segments.next_segment() => segment,
        };

        match segment {
            Ok(Some(bytes)) => {
                let sent = tokio::select! {
                    () = token.cancelled() => {
                        process.abort();
                        return Err(RepairError::Cancelled);
                    }
                    sent = tx.send(decode_line(&bytes)) => sent,
                };

                if sent.is_err() {
                    debug!("Output consumer closed; aborting remote command");
                    process.abort();
                    return Ok(());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read command output");
                process.abort();
                return Err(RepairError::StreamFailed(e.to_string()));
            }
        }
    }

    // Close the pipe before waiting so the consumer can finish draining.
    drop(tx);

    let waited = tokio::select! {
        () = token.cancelled() => None,
        result = process.wait() => Some(result),
    };
    let result = waited.unwrap_or_else(|| {
        process.abort();
        Err(RepairError::Cancelled)
    });

    if let Err(e) = &result {
        warn!(error = %e, "Failed to get result");
    }
    result
}

/// TTY output ends lines with `\r\n`; nodetool output is not guaranteed UTF-8.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
