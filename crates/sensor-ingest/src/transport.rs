//! Byte transports carrying the binary frame stream.

use std::{
    fmt,
    io::Read,
    net::TcpStream,
    time::Duration,
};

use tracing::debug;

use crate::types::TransportError;

/// Readable byte stream handed to the decoder loop.
pub type ByteStream = Box<dyn Read + Send>;

/// Where the sensor head is reachable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSpec {
    /// Local serial device, e.g. `/dev/ttyUSB0` or `COM5`.
    Serial { path: String, baud: u32 },
    /// Serial-over-TCP bridge given as `tcp://host:port`.
    Tcp { addr: String },
}

impl TransportSpec {
    /// Infer the transport from an address string.
    pub fn from_address(address: &str, baud: u32) -> Self {
        match address.strip_prefix("tcp://") {
            Some(addr) => TransportSpec::Tcp { addr: addr.into() },
            None => TransportSpec::Serial {
                path: address.into(),
                baud,
            },
        }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Serial { path, baud } => write!(f, "{path} @ {baud} baud"),
            TransportSpec::Tcp { addr } => write!(f, "tcp://{addr}"),
        }
    }
}

/// Opens (and reopens) a byte stream.
///
/// Streams must honour a read timeout so the reading loop can observe
/// shutdown; a timed-out read surfaces as `WouldBlock`/`TimedOut`.
pub trait Connector: Send {
    fn connect(&mut self) -> Result<ByteStream, TransportError>;

    fn describe(&self) -> String;
}

/// Connector for real serial ports and TCP bridges.
pub struct SystemConnector {
    spec: TransportSpec,
    read_timeout: Duration,
}

impl SystemConnector {
    pub fn new(spec: TransportSpec, read_timeout: Duration) -> Self {
        Self { spec, read_timeout }
    }
}

impl Connector for SystemConnector {
    fn connect(&mut self) -> Result<ByteStream, TransportError> {
        match &self.spec {
            TransportSpec::Serial { path, baud } => {
                let port = serialport::new(path.as_str(), *baud)
                    .timeout(self.read_timeout)
                    .open()
                    .map_err(|source| TransportError::OpenSerial {
                        path: path.clone(),
                        baud: *baud,
                        source,
                    })?;
                debug!("opened serial port {path}");
                Ok(Box::new(port))
            }
            TransportSpec::Tcp { addr } => {
                let stream =
                    TcpStream::connect(addr.as_str()).map_err(|source| TransportError::Connect {
                        addr: addr.clone(),
                        source,
                    })?;
                stream.set_read_timeout(Some(self.read_timeout))?;
                stream.set_nodelay(true)?;
                debug!("connected to {addr}");
                Ok(Box::new(stream))
            }
        }
    }

    fn describe(&self) -> String {
        self.spec.to_string()
    }
}
