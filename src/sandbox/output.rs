//! Collection of streamed execution output into bounded buffers.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{OutputReceiver, OutputSender, SandboxError};

/// Chunk capacity of the output channels handed to a sandbox.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Creates a stdout or stderr channel pair.
pub fn stream_channel() -> (OutputSender, OutputReceiver) {
    tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY)
}

/// Byte buffer that silently drops everything written beyond its cap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    /// A cap of `0` means unbounded.
    pub fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            truncated: false,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        if self.cap == 0 {
            self.data.extend_from_slice(chunk);
            return;
        }

        let room = self.cap.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if any write was cut off at the cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Lossy UTF-8 view of the collected bytes.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Consumer task draining the stdout and stderr channels of one execution.
///
/// Must be spawned before the sandbox starts producing. It finishes when both
/// channels are closed or when [`OutputCollector::stop`] is called, in which
/// case chunks already queued are still collected.
#[derive(Debug)]
pub struct OutputCollector {
    stop: CancellationToken,
    handle: JoinHandle<(CappedBuffer, CappedBuffer)>,
}

impl OutputCollector {
    pub fn spawn(stdout: OutputReceiver, stderr: OutputReceiver, cap: usize) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(collect(stdout, stderr, cap, stop.clone()));
        Self { stop, handle }
    }

    /// Stops the consumer and returns the stdout and stderr buffers.
    pub async fn stop(self) -> Result<(CappedBuffer, CappedBuffer), SandboxError> {
        self.stop.cancel();
        self.handle
            .await
            .map_err(|e| SandboxError::Backend(format!("output collector failed: {}", e)))
    }
}

async fn collect(
    mut stdout: OutputReceiver,
    mut stderr: OutputReceiver,
    cap: usize,
    stop: CancellationToken,
) -> (CappedBuffer, CappedBuffer) {
    let mut out = CappedBuffer::new(cap);
    let mut err = CappedBuffer::new(cap);
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        tokio::select! {
            biased;

            chunk = stdout.recv(), if out_open => match chunk {
                Some(chunk) => out.write(&chunk),
                None => out_open = false,
            },
            chunk = stderr.recv(), if err_open => match chunk {
                Some(chunk) => err.write(&chunk),
                None => err_open = false,
            },
            _ = stop.cancelled() => {
                while let Ok(chunk) = stdout.try_recv() {
                    out.write(&chunk);
                }
                while let Ok(chunk) = stderr.try_recv() {
                    err.write(&chunk);
                }
                break;
            }
        }
    }

    (out, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_buffer_truncates_silently() {
        let mut buf = CappedBuffer::new(5);
        buf.write(b"abc");
        assert!(!buf.is_truncated());
        buf.write(b"defgh");
        assert_eq!(buf.as_bytes(), b"abcde");
        assert!(buf.is_truncated());
        buf.write(b"x");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_capped_buffer_unbounded() {
        let mut buf = CappedBuffer::new(0);
        buf.write(&[b'a'; 4096]);
        assert_eq!(buf.len(), 4096);
        assert!(!buf.is_truncated());
    }

    #[tokio::test]
    async fn test_collector_finishes_when_channels_close() {
        let (out_tx, out_rx) = stream_channel();
        let (err_tx, err_rx) = stream_channel();
        let collector = OutputCollector::spawn(out_rx, err_rx, 0);

        out_tx.send(b"hello ".to_vec()).await.unwrap();
        err_tx.send(b"oops".to_vec()).await.unwrap();
        out_tx.send(b"world".to_vec()).await.unwrap();
        drop(out_tx);
        drop(err_tx);

        let (out, err) = collector.stop().await.unwrap();
        assert_eq!(out.to_string_lossy(), "hello world");
        assert_eq!(err.to_string_lossy(), "oops");
    }

    #[tokio::test]
    async fn test_collector_stop_drains_queued_chunks() {
        let (out_tx, out_rx) = stream_channel();
        let (_err_tx, err_rx) = stream_channel();
        let collector = OutputCollector::spawn(out_rx, err_rx, 0);

        out_tx.send(b"queued".to_vec()).await.unwrap();

        // senders stay open; only the stop signal ends collection
        let (out, err) = collector.stop().await.unwrap();
        assert_eq!(out.to_string_lossy(), "queued");
        assert!(err.is_empty());
    }
}
