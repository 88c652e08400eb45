//! Module for logical communication channels with an ECU
//!
//! Three seams are defined here:
//! * [ByteChannel] - an opaque bidirectional byte pipe (serial line)
//! * [CanChannel] - a raw CAN frame pipe (11-bit IDs, up to 8 data bytes)
//! * [PayloadTransport] - a framed request/response pipe, implemented by the
//!   protocol transports in this crate and consumed by
//!   [Kwp2000Client](crate::kwp2000::Kwp2000Client)

use std::time::Duration;

use crate::{DiagError, DiagServerResult};

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// Underlying IO Error with channel
    IOError(std::io::Error),
    /// Timeout when writing data to the channel
    WriteTimeout,
    /// Timeout when reading from the channel
    ReadTimeout,
    /// The channel's Rx buffer is empty
    BufferEmpty,
    /// Unsupported channel request
    UnsupportedRequest,
    /// The interface is not open
    InterfaceNotOpen,
    /// Underlying API error with hardware
    APIError {
        /// Name of the API EG: 'serialport'
        api_name: String,
        /// Internal API error code
        code: u8,
        /// API error description
        desc: String,
    },
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::IOError(e) => write!(f, "IO error: {e}"),
            ChannelError::WriteTimeout => write!(f, "timeout writing to channel"),
            ChannelError::ReadTimeout => write!(f, "timeout reading from channel"),
            ChannelError::BufferEmpty => write!(f, "channel's Receive buffer is empty"),
            ChannelError::UnsupportedRequest => write!(f, "unsupported channel request"),
            ChannelError::InterfaceNotOpen => write!(f, "channel's interface is not open"),
            ChannelError::APIError {
                api_name,
                code,
                desc,
            } => write!(f, "underlying {api_name} API error ({code}): {desc}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::IOError(io_err) = self {
            Some(io_err)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::IOError(e)
    }
}

/// Base trait for an opaque byte pipe to an ECU (serial UART, USB adapter...).
///
/// Implementations must not add or strip framing; the protocol layers in this
/// crate own the wire format.
pub trait ByteChannel: Send {
    /// Opens the interface
    fn open(&mut self) -> ChannelResult<()>;

    /// Closes the interface
    fn close(&mut self) -> ChannelResult<()>;

    /// Writes exactly the given bytes to the channel
    fn send(&mut self, data: &[u8]) -> ChannelResult<()>;

    /// Returns whatever bytes arrive within the window, up to an implementation
    /// maximum (1024 bytes is typical), or None if nothing arrived
    fn wait_frame(&mut self, timeout: Duration) -> ChannelResult<Option<Vec<u8>>>;

    /// Changes the line baud rate. Optional; channels which cannot re-baud
    /// return [ChannelError::UnsupportedRequest]
    fn set_baudrate(&mut self, baud: u32) -> ChannelResult<()> {
        let _ = baud;
        Err(ChannelError::UnsupportedRequest)
    }
}

/// A single CAN frame (11-bit identifier, up to 8 data bytes)
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    dlc: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Creates a new CAN frame. Data beyond 8 bytes is truncated
    pub fn new(id: u32, data: &[u8]) -> Self {
        let dlc = data.len().min(8);
        let mut d = [0u8; 8];
        d[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data: d,
        }
    }

    /// Returns the CAN identifier of the frame
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the data portion of the frame
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CanFrame {{ id: 0x{:03X}, data: {:02X?} }}", self.id, self.data())
    }
}

/// Base trait for a raw CAN frame pipe to an ECU
pub trait CanChannel: Send {
    /// Opens the interface
    fn open(&mut self) -> ChannelResult<()>;

    /// Closes the interface
    fn close(&mut self) -> ChannelResult<()>;

    /// Sends a single CAN frame
    fn send_can_frame(&mut self, id: u32, data: &[u8]) -> ChannelResult<()>;

    /// Receives a single CAN frame, or None if nothing arrived within the window
    fn recv_can_frame(&mut self, timeout: Duration) -> ChannelResult<Option<CanFrame>>;
}

/// A framed payload pipe: one `send` carries one complete service payload, one
/// `wait_frame` yields one complete service payload. Implemented by
/// [StarSerialTransport](crate::star::serial::StarSerialTransport),
/// [StarCanTransport](crate::star::can::StarCanTransport),
/// [DcanSerialTransport](crate::star::dcan::DcanSerialTransport) and
/// [Tp20Transport](crate::tp20::Tp20Transport).
pub trait PayloadTransport: Send {
    /// Opens the transport. For connection oriented transports (TP 2.0) this
    /// also establishes the channel
    fn open(&mut self) -> DiagServerResult<()>;

    /// Closes the transport, disconnecting any established channel
    fn close(&mut self) -> DiagServerResult<()>;

    /// Sends one complete service payload
    fn send(&mut self, payload: &[u8]) -> DiagServerResult<()>;

    /// Waits for one complete service payload. Returns None if nothing arrived
    /// within the window. Some transports derive the actual window from their
    /// negotiated timing parameters instead of the argument
    fn wait_frame(&mut self, timeout: Duration) -> DiagServerResult<Option<Vec<u8>>>;

    /// Changes the link baud rate where the underlying channel supports it
    fn set_baudrate(&mut self, baud: u32) -> DiagServerResult<()> {
        let _ = baud;
        Err(DiagError::ChannelError(ChannelError::UnsupportedRequest))
    }
}
