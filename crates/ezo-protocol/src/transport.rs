//! Line Transport
//!
//! Frames bytes from the serial receive path into lines and writes
//! commands. Receiving happens on a separate task that only appends to the
//! shared [`LineBuffer`]; reading polls that buffer against a deadline.

use crate::clock::{self, Deadline};
use crate::command::Command;
use crate::error::EzoError;
use ring_buffer::LineBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Line terminator in both directions
pub const TERMINATOR: u8 = b'\r';

/// First byte of every status line
pub const STATUS_MARKER: u8 = b'*';

/// Spawn the receive path: append every byte read from `reader` to `buffer`.
///
/// The task never waits on the consumer; it ends on end-of-stream or a read
/// error.
pub fn spawn_receiver<R>(mut reader: R, buffer: Arc<LineBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 64];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("Serial receiver reached end of stream");
                    break;
                }
                Ok(n) => buffer.extend(&chunk[..n]),
                Err(e) => {
                    warn!("Serial receive error: {}", e);
                    break;
                }
            }
        }
    })
}

/// Command writer plus line reader over one serial link
pub struct LineTransport<W> {
    /// Transmit side of the link, `None` once closed
    writer: Option<W>,
    /// Bytes received so far
    rx: Arc<LineBuffer>,
    /// Receive task, if this transport owns one
    receiver: Option<JoinHandle<()>>,
}

impl<W: AsyncWrite + Unpin> LineTransport<W> {
    /// Create a transport over a writer and an externally fed buffer
    pub fn new(writer: W, rx: Arc<LineBuffer>) -> Self {
        Self {
            writer: Some(writer),
            rx,
            receiver: None,
        }
    }

    /// Create a transport that owns its receive task
    pub fn with_receiver<R>(writer: W, reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let rx = Arc::new(LineBuffer::with_default_capacity());
        let receiver = spawn_receiver(reader, Arc::clone(&rx));
        Self {
            writer: Some(writer),
            rx,
            receiver: Some(receiver),
        }
    }

    /// Whether the link can still carry commands
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Release the link.
    ///
    /// Returns once the receive task has stopped and both halves are
    /// dropped, so the device can be opened again immediately.
    pub async fn close(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
            if let Err(e) = receiver.await {
                if !e.is_cancelled() {
                    warn!("Serial receiver ended abnormally: {}", e);
                }
            }
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Serial writer shutdown failed: {}", e);
            }
        }
        self.rx.clear();
    }

    /// Send one command.
    ///
    /// The receive buffer is flushed first so that replies still queued
    /// from a previous command cannot be taken for this command's reply.
    pub async fn write_line(&mut self, command: &Command) -> Result<(), EzoError> {
        let writer = self.writer.as_mut().ok_or(EzoError::LinkClosed)?;
        let frame = command.frame();
        self.rx.clear();
        debug!(">>> {}", command);
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Drop buffered bytes up to the next status marker
    pub fn resync(&self) -> usize {
        let skipped = self.rx.skip_until(STATUS_MARKER);
        if skipped > 0 {
            trace!("Skipped {} bytes before status marker", skipped);
        }
        skipped
    }

    /// Read one line from the current buffer head.
    ///
    /// Waits until a terminator arrives, the line grows past `max_len`
    /// (`BufferOverflow`), or `timeout` elapses (`Timeout`). The deadline
    /// holds even while bytes keep arriving.
    pub async fn read_line(&mut self, max_len: usize, timeout: Duration) -> Result<String, EzoError> {
        let deadline = Deadline::after(timeout);
        let mut line = Vec::with_capacity(max_len);

        loop {
            if deadline.expired() {
                return Err(EzoError::Timeout(deadline.budget_ms()));
            }
            match self.rx.pop() {
                Some(TERMINATOR) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    debug!("<<< {}", text);
                    return Ok(text);
                }
                Some(byte) => {
                    line.push(byte);
                    if line.len() > max_len {
                        return Err(EzoError::BufferOverflow(max_len));
                    }
                }
                None => clock::pause().await,
            }
        }
    }
}

impl<W> Drop for LineTransport<W> {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;

    fn transport() -> (LineTransport<Vec<u8>>, Arc<LineBuffer>) {
        let rx = Arc::new(LineBuffer::new(64));
        (LineTransport::new(Vec::new(), Arc::clone(&rx)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line() {
        let (mut transport, rx) = transport();
        rx.extend(b"1413.00\r*OK\r");

        let line = transport.read_line(41, Duration::from_millis(100)).await.unwrap();
        assert_eq!(line, "1413.00");
        let line = transport.read_line(5, Duration::from_millis(100)).await.unwrap();
        assert_eq!(line, "*OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_timeout() {
        let (mut transport, rx) = transport();
        rx.extend(b"partial");

        let err = transport.read_line(41, Duration::from_millis(250)).await.unwrap_err();
        assert!(matches!(err, EzoError::Timeout(250)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_overflow() {
        let (mut transport, rx) = transport();
        rx.extend(b"*TOOLONG\r");

        let err = transport.read_line(5, Duration::from_millis(250)).await.unwrap_err();
        assert!(matches!(err, EzoError::BufferOverflow(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_reported_for_late_bytes() {
        let (mut transport, rx) = transport();
        let feeder = {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                rx.extend(b"0123456789");
            })
        };

        let err = transport.read_line(5, Duration::from_millis(250)).await.unwrap_err();
        assert!(matches!(err, EzoError::BufferOverflow(5)));
        feeder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_line_flushes_stale_replies() {
        let (mut transport, rx) = transport();
        rx.extend(b"stale\r*OK\r");

        transport.write_line(&command!("K,{}", "1.0").unwrap()).await.unwrap();

        assert!(rx.is_empty());
        assert_eq!(transport.writer.as_deref(), Some(&b"K,1.0\r"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_after_close_fails() {
        let (mut transport, rx) = transport();
        rx.extend(b"*OK\r");
        transport.close().await;

        assert!(!transport.is_open());
        assert!(rx.is_empty());
        let err = transport.write_line(&command!("R").unwrap()).await.unwrap_err();
        assert!(matches!(err, EzoError::LinkClosed));
        assert_eq!(err.code(), -107);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_both_halves() {
        let (device, host) = tokio::io::duplex(64);
        let (host_rx, host_tx) = tokio::io::split(host);
        let mut transport = LineTransport::with_receiver(host_tx, host_rx);
        let (mut device_rx, _device_tx) = tokio::io::split(device);

        transport.close().await;

        // With the host end fully dropped the device sees end of stream
        let mut byte = [0u8; 1];
        assert_eq!(device_rx.read(&mut byte).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_holds_while_bytes_stream() {
        let (mut transport, rx) = transport();
        let feeder = {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                for _ in 0..200 {
                    rx.push(b'0');
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        let err = transport.read_line(1000, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, EzoError::Timeout(50)));
        feeder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_skips_to_marker() {
        let (mut transport, rx) = transport();
        rx.extend(b"noise*RS\r");

        assert_eq!(transport.resync(), 5);
        let line = transport.read_line(5, Duration::from_millis(10)).await.unwrap();
        assert_eq!(line, "*RS");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_feeds_buffer() {
        let (device, host) = tokio::io::duplex(64);
        let (host_rx, host_tx) = tokio::io::split(host);
        let mut transport = LineTransport::with_receiver(host_tx, host_rx);

        let (_device_rx, mut device_tx) = tokio::io::split(device);
        device_tx.write_all(b"?I,EC,2.16\r").await.unwrap();

        let line = transport.read_line(41, Duration::from_millis(500)).await.unwrap();
        assert_eq!(line, "?I,EC,2.16");
    }
}
