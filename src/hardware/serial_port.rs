//! [ByteChannel] implementation over a physical serial port

use std::{
    io::{Read, Write},
    time::Duration,
};

use log::{debug, info};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::channel::{ByteChannel, ChannelError, ChannelResult};

/// Largest chunk a single [ByteChannel::wait_frame] call returns
const READ_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
/// Error produced by the serial port channel
pub enum SerialChannelError {
    /// IO error from the port
    #[error("IO error")]
    Io(#[from] std::io::Error),
    /// Error reported by the serialport API
    #[error("serialport API error: {0}")]
    Api(String),
    /// The port is not open
    #[error("port is not open")]
    NotOpen,
}

impl From<SerialChannelError> for ChannelError {
    fn from(e: SerialChannelError) -> Self {
        match e {
            SerialChannelError::Io(io) => ChannelError::IOError(io),
            SerialChannelError::Api(desc) => ChannelError::APIError {
                api_name: "serialport".into(),
                code: 0,
                desc,
            },
            SerialChannelError::NotOpen => ChannelError::InterfaceNotOpen,
        }
    }
}

impl From<serialport::Error> for SerialChannelError {
    fn from(e: serialport::Error) -> Self {
        Self::Api(e.description)
    }
}

/// A [ByteChannel] backed by a serial port (USB adapter, FTDI cable...).
///
/// The port is configured at construction and physically opened by
/// [ByteChannel::open]
pub struct SerialByteChannel {
    path: String,
    baudrate: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SerialByteChannel {{ path: {}, baudrate: {} }}",
            self.path, self.baudrate
        )
    }
}

impl SerialByteChannel {
    /// Creates a channel with an explicit line configuration
    pub fn with_config(
        path: &str,
        baudrate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Self {
        Self {
            path: path.to_string(),
            baudrate,
            data_bits,
            parity,
            stop_bits,
            port: None,
        }
    }

    /// Creates a channel configured for DS2 and STAR serial links:
    /// 9600 baud, 8 data bits, even parity, two stop bits
    pub fn ds2(path: &str) -> Self {
        Self::with_config(path, 9600, DataBits::Eight, Parity::Even, StopBits::Two)
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, SerialChannelError> {
        self.port.as_mut().ok_or(SerialChannelError::NotOpen)
    }
}

impl ByteChannel for SerialByteChannel {
    fn open(&mut self) -> ChannelResult<()> {
        let port = serialport::new(self.path.as_str(), self.baudrate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(SerialChannelError::from)?;
        port.clear(ClearBuffer::All)
            .map_err(SerialChannelError::from)?;
        info!("Opened serial port {} at {} baud", self.path, self.baudrate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        self.port = None;
        info!("Closed serial port {}", self.path);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> ChannelResult<()> {
        let port = self.port_mut()?;
        port.write_all(data).map_err(SerialChannelError::Io)?;
        port.flush().map_err(SerialChannelError::Io)?;
        debug!("Serial TX {} bytes: {data:02X?}", data.len());
        Ok(())
    }

    fn wait_frame(&mut self, timeout: Duration) -> ChannelResult<Option<Vec<u8>>> {
        let port = self.port_mut()?;
        // serialport clamps a zero timeout to blocking on some platforms
        port.set_timeout(timeout.max(Duration::from_millis(1)))
            .map_err(SerialChannelError::from)?;
        let mut buf = [0u8; READ_CHUNK];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                debug!("Serial RX {n} bytes: {:02X?}", &buf[..n]);
                Ok(Some(buf[..n].to_vec()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(SerialChannelError::Io(e).into()),
        }
    }

    fn set_baudrate(&mut self, baud: u32) -> ChannelResult<()> {
        let port = self.port_mut()?;
        port.set_baud_rate(baud).map_err(SerialChannelError::from)?;
        self.baudrate = baud;
        info!("Serial port {} re-bauded to {baud}", self.path);
        Ok(())
    }
}
