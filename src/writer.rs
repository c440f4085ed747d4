//! Writer stage of a connection.
//!
//! Encoded response frames arrive over an mpsc channel and are written to the
//! socket in batches using scatter/gather I/O, so a burst of small responses
//! costs one `writev` instead of one write per frame.
//!
//! # Architecture
//!
//! ```text
//! ordering stage ─► mpsc::Sender<OutboundFrame> ─► write_loop ─► socket
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{NetwireError, Result};
use crate::protocol::{LengthPrefix, LENGTH_PREFIX_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix.
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Wrap an already size-checked payload.
    #[inline]
    pub fn new(payload: Bytes) -> Self {
        Self {
            prefix: LengthPrefix::new(payload.len() as u32).encode(),
            payload,
        }
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }
}

/// Handle for sending frames to the writer stage.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame, waiting while the channel is full.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| NetwireError::ConnectionClosed)
    }
}

/// Create the channel between a producer and [`write_loop`].
pub fn writer_channel(capacity: usize) -> (WriterHandle, mpsc::Receiver<OutboundFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (WriterHandle { tx }, rx)
}

/// Receive frames and write them until every sender is dropped.
///
/// Uses batching and scatter/gather I/O (writev).
pub async fn write_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                writer.shutdown().await.ok();
                return Ok(());
            }
        };

        batch.clear();
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of frames using `write_vectored`, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(NetwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let prefix_end = offset + LENGTH_PREFIX_SIZE;
        if skip_bytes < prefix_end {
            slices.push(IoSlice::new(&frame.prefix[skip_bytes.saturating_sub(offset)..]));
        }
        offset = prefix_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                slices.push(IoSlice::new(&frame.payload[skip_bytes.saturating_sub(offset)..]));
            }
            offset = payload_end;
        }
    }

    slices
}
