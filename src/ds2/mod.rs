//! Module for DS2, BMW's pre-KWP2000 byte stream diagnostic protocol
//!
//! DS2 is spoken half-duplex over a single K-line style serial connection,
//! 9600 baud, 8 data bits, even parity, two stop bits. The line echoes the
//! tester's own bytes back, so every transaction is: send the request frame,
//! read back and discard exactly as many echo bytes as were sent, then read
//! the ECU's reply frame.
//!
//! Reply payloads carry a status octet ahead of the data; see [Ds2Status].

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{channel::ByteChannel, DiagError, DiagServerResult};

pub mod frame;
pub mod services;

/// DS2 default serial configuration is 9600 baud 8-E-1
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// Status octet carried as the first payload byte of every DS2 reply
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ds2Status {
    /// 0xA0 - positive response, data follows
    Okay,
    /// 0xA1 - ECU busy, the request may be retried
    Busy,
    /// 0xA2 - ECU rejected the request
    Rejected,
    /// 0xA3 - invalid parameter
    InvalidParameter,
    /// 0xA4 - invalid function
    InvalidFunction,
    /// 0xA5 - invalid number
    InvalidNumber,
    /// 0xFF - NACK, invalid command
    Nack,
    /// Any other status octet, passed through unmodified
    Unknown(u8),
}

impl From<u8> for Ds2Status {
    fn from(b: u8) -> Self {
        match b {
            0xA0 => Self::Okay,
            0xA1 => Self::Busy,
            0xA2 => Self::Rejected,
            0xA3 => Self::InvalidParameter,
            0xA4 => Self::InvalidFunction,
            0xA5 => Self::InvalidNumber,
            0xFF => Self::Nack,
            x => Self::Unknown(x),
        }
    }
}

impl Ds2Status {
    /// Returns the raw status octet
    pub fn code(&self) -> u8 {
        match self {
            Self::Okay => 0xA0,
            Self::Busy => 0xA1,
            Self::Rejected => 0xA2,
            Self::InvalidParameter => 0xA3,
            Self::InvalidFunction => 0xA4,
            Self::InvalidNumber => 0xA5,
            Self::Nack => 0xFF,
            Self::Unknown(x) => *x,
        }
    }
}

impl std::fmt::Display for Ds2Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match self {
            Self::Okay => "OK",
            Self::Busy => "computer busy",
            Self::Rejected => "ECU rejected the request",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidFunction => "invalid function",
            Self::InvalidNumber => "invalid number",
            Self::Nack => "NACK (invalid command)",
            Self::Unknown(x) => return write!(f, "unknown status 0x{x:02X}"),
        };
        write!(f, "{desc}")
    }
}

/// A parsed DS2 reply
#[derive(Debug, Clone)]
pub struct Ds2Response {
    /// Address of the responding ECU
    pub ecu_address: u8,
    /// Status octet of the reply
    pub status: Ds2Status,
    /// Payload bytes following the status octet
    pub data: Vec<u8>,
}

/// DS2 client bound to a byte channel.
///
/// ```no_run
/// use legacy_diagnostics::ds2::{services::ecu_address, Ds2Client};
/// use legacy_diagnostics::hardware::serial_port::SerialByteChannel;
///
/// let port = SerialByteChannel::ds2("/dev/ttyUSB0");
/// let mut client = Ds2Client::new(port);
/// client.open().unwrap();
/// let ident = client.ident(ecu_address::MOTRONIC).unwrap();
/// println!("{:02X?}", ident);
/// client.close().unwrap();
/// ```
#[derive(Debug)]
pub struct Ds2Client<C: ByteChannel> {
    channel: C,
    open: bool,
    timeout: Duration,
    pending: VecDeque<u8>,
}

impl<C: ByteChannel> Ds2Client<C> {
    /// Creates a new DS2 client over the given byte channel with the default
    /// 5 second transaction timeout
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            open: false,
            timeout: Duration::from_secs(5),
            pending: VecDeque::new(),
        }
    }

    /// Sets the transaction timeout used for echo and reply reads
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Opens the underlying channel
    pub fn open(&mut self) -> DiagServerResult<()> {
        self.channel.open()?;
        self.open = true;
        Ok(())
    }

    /// Closes the underlying channel
    pub fn close(&mut self) -> DiagServerResult<()> {
        self.channel.close()?;
        self.open = false;
        self.pending.clear();
        Ok(())
    }

    /// Sends a raw DS2 request and waits for the reply.
    ///
    /// Performs the full half-duplex transaction: frame build, echo discard,
    /// incremental reply parse and status octet classification. A non-OK
    /// status surfaces as [DiagError::Ds2Status], except unknown status
    /// octets which are passed through in the returned response
    pub fn send_request(&mut self, addr: u8, payload: &[u8]) -> DiagServerResult<Ds2Response> {
        if !self.open {
            return Err(DiagError::ChannelError(
                crate::channel::ChannelError::InterfaceNotOpen,
            ));
        }
        let frame = frame::build_frame(addr, payload)?;
        debug!("DS2 request: {frame:02X?}");
        let deadline = Instant::now() + self.timeout;

        self.channel.send(&frame)?;

        // The line echoes our own transmission back first
        let echo = self.read_exact(frame.len(), deadline, "DS2 echo")?;
        if echo != frame {
            warn!("DS2 echo did not match transmitted frame: {echo:02X?}");
        }

        // Reply: address and size first, then the remainder of the frame
        let mut reply = self.read_exact(2, deadline, "DS2 reply header")?;
        let size = reply[1] as usize;
        if size < 3 {
            return Err(DiagError::InvalidFrame(format!(
                "invalid DS2 size byte {size}"
            )));
        }
        reply.extend(self.read_exact(size - 2, deadline, "DS2 reply")?);
        debug!("DS2 reply: {reply:02X?}");

        let (ecu_address, body) = frame::parse_frame(&reply)?;
        if ecu_address != addr {
            return Err(DiagError::InvalidFrame(format!(
                "unexpected DS2 sender 0x{ecu_address:02X}, expected 0x{addr:02X}"
            )));
        }
        if body.is_empty() {
            return Err(DiagError::EmptyResponse);
        }
        let status = Ds2Status::from(body[0]);
        match status {
            Ds2Status::Okay | Ds2Status::Unknown(_) => Ok(Ds2Response {
                ecu_address,
                status,
                data: body[1..].to_vec(),
            }),
            other => Err(DiagError::Ds2Status(other)),
        }
    }

    /// Reads exactly `n` bytes from the channel, buffering any surplus the
    /// channel delivered for the next read
    fn read_exact(
        &mut self,
        n: usize,
        deadline: Instant,
        op: &'static str,
    ) -> DiagServerResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if let Some(b) = self.pending.pop_front() {
                out.push(b);
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DiagError::Timeout(op));
            }
            if let Some(chunk) = self.channel.wait_frame(deadline - now)? {
                self.pending.extend(chunk);
            }
        }
        Ok(out)
    }
}
