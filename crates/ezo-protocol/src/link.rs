//! Serial Link Establishment
//!
//! Opening a link yields a ready [`EzoClient`]. Baud rate recovery needs to
//! reopen the same device at different speeds, so opening goes through
//! the [`Connector`] trait.

use crate::client::EzoClient;
use crate::error::EzoError;
use crate::transport::LineTransport;
use tokio::io::{AsyncWrite, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

/// Something that can open a link to the transducer at a given baud rate
pub trait Connector {
    /// Transmit side of an opened link
    type Writer: AsyncWrite + Unpin + Send;

    /// Open (or reopen) the link at `baud_rate`
    fn connect(&mut self, baud_rate: u32) -> Result<EzoClient<Self::Writer>, EzoError>;
}

/// Opens a host serial device (e.g. `/dev/ttyUSB0`)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    device: String,
}

impl SerialConnector {
    /// Create a connector for the named serial device
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Connector for SerialConnector {
    type Writer = WriteHalf<SerialStream>;

    fn connect(&mut self, baud_rate: u32) -> Result<EzoClient<Self::Writer>, EzoError> {
        let port = tokio_serial::new(&self.device, baud_rate).open_native_async()?;
        let (reader, writer) = tokio::io::split(port);

        info!("Opened {} at {} baud", self.device, baud_rate);
        Ok(EzoClient::new(LineTransport::with_receiver(writer, reader), baud_rate))
    }
}
