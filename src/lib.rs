#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! A crate which implements the tester (client) side of the legacy diagnostic protocols
//! used by German OEM ECUs from the mid 90s through to the mid 2000s, along with the
//! transport plumbing needed to run them over serial lines and CAN.
//!
//! ## Protocol support
//!
//! ### DS2
//! BMW's early byte stream diagnostic protocol, spoken half-duplex over a 9600 8-E-1
//! serial line. Supports identification and direct memory read/write of body and
//! drivetrain modules (IKE, LCM, Motronic...).
//!
//! ### Keyword protocol 2000 (KWP2000)
//! ISO14230 - KWP2000 allows for complex operations which could potentially cause damage
//! to a vehicle if used incorrectly. A few examples of features allowed by KWP2000 are
//! * ECU flashing (upload/download and transfer services)
//! * Clearing and reading of permanent DTCs
//! * Manipulation of ECU communication timing parameters
//! * Low level manipulation of ECU's EEPROM or RAM
//!
//! The service catalog implemented here is the BMW flavoured one, including the
//! non-standard `EscCode` (0x80) service and the `StartCommunication` /
//! `StopCommunication` / `AccessTimingParameter` / `SendData` communication services.
//!
//! ### KWP2000-STAR
//! BMW's framing overlay for KWP2000, either over a serial line (0xB8 start byte
//! telegrams) or over CAN using ISO15765-2 style segmentation with a 1 byte address
//! prefix. The serial variant supports live baud rate changes and blind baud rate
//! identification.
//!
//! ### VW Transport Protocol 2.0 (TP 2.0)
//! A connection oriented segmented transfer protocol over CAN, used by VAG ECUs as the
//! carrier for KWP2000. The engine in this crate performs channel setup, timing
//! parameter negotiation, blockwise segmented transfer with ACK pacing, keep-alive
//! and disconnect.
//!
//! ## Hardware
//! Physical interfaces are deliberately out of scope. The crate talks to the outside
//! world through two small traits ([channel::ByteChannel] and [channel::CanChannel]);
//! a [serialport](https://crates.io/crates/serialport) backed implementation of the
//! byte channel is provided behind the `serial` feature, and scripted simulation
//! channels for testing live in [hardware::simulation].

use channel::ChannelError;

pub mod channel;
pub mod ds2;
pub mod hardware;
pub mod kwp2000;
pub mod star;
pub mod tp20;

/// Diagnostic server result
pub type DiagServerResult<T> = Result<T, DiagError>;

#[derive(Debug)]
/// Diagnostic server error
pub enum DiagError {
    /// ECU responded negatively to the request
    NegativeResponse {
        /// Service ID the ECU echoed back in the negative response
        sid: u8,
        /// Raw negative response code from the ECU
        code: u8,
        /// Negative response code definition according to protocol
        def: Option<String>,
    },
    /// Response empty
    EmptyResponse,
    /// ECU Responded but send a message that wasn't a reply for the sent message
    WrongMessage,
    /// ECU Responded with a message, but the length was incorrect
    InvalidResponseLength,
    /// A parameter given to the function is invalid. Check the function's documentation
    /// for more information
    ParameterInvalid,
    /// No response within the allowed window. The string names the operation
    /// that was waiting
    Timeout(&'static str),
    /// A link layer frame had an invalid structure (short frame, bad start byte,
    /// address mismatch...)
    InvalidFrame(String),
    /// Link level checksum mismatch
    BadChecksum {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte carried by the frame
        got: u8,
    },
    /// TP 2.0 remote rejected the channel setup request with the given opcode
    ChannelSetupRejected(u8),
    /// TP 2.0 channel disconnect frame received, or channel never established
    Disconnected,
    /// TP 2.0 ACK window expired for the given sequence number
    AckTimeout(u8),
    /// TP 2.0 or ISO-TP data frame arrived out of order
    SequenceError {
        /// Sequence number that was expected
        expected: u8,
        /// Sequence number that arrived
        got: u8,
    },
    /// The ECU Param ID did not match the request, but the Service ID was correct.
    /// The string names the mismatched field
    MismatchedEcho(&'static str),
    /// DS2 status octet was not OK
    Ds2Status(ds2::Ds2Status),
    /// Error with underlying communication channel
    ChannelError(ChannelError),
}

impl std::fmt::Display for DiagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            DiagError::NegativeResponse { sid, code, def } => {
                if let Some(d) = def {
                    write!(f, "ECU error 0x{code:02X} ({d}) for service 0x{sid:02X}")
                } else {
                    write!(f, "ECU error 0x{code:02X} for service 0x{sid:02X}")
                }
            }
            DiagError::EmptyResponse => write!(f, "ECU provided an empty response"),
            DiagError::WrongMessage => write!(f, "ECU response message did not match request"),
            DiagError::InvalidResponseLength => {
                write!(f, "ECU response message was of invalid length")
            }
            DiagError::ParameterInvalid => write!(f, "a parameter provided was invalid"),
            DiagError::Timeout(op) => write!(f, "timeout waiting for {op}"),
            DiagError::InvalidFrame(reason) => write!(f, "invalid frame: {reason}"),
            DiagError::BadChecksum { expected, got } => {
                write!(f, "checksum mismatch, expected 0x{expected:02X} got 0x{got:02X}")
            }
            DiagError::ChannelSetupRejected(op) => {
                write!(f, "channel setup rejected with opcode 0x{op:02X}")
            }
            DiagError::Disconnected => write!(f, "channel disconnected"),
            DiagError::AckTimeout(seq) => {
                write!(f, "timeout waiting for ACK of sequence {seq}")
            }
            DiagError::SequenceError { expected, got } => {
                write!(f, "sequence error, expected {expected} got {got}")
            }
            DiagError::MismatchedEcho(field) => {
                write!(f, "response echoed a different {field} than what was sent")
            }
            DiagError::Ds2Status(s) => write!(f, "DS2 status: {s}"),
            DiagError::ChannelError(err) => write!(f, "underlying channel error: {err}"),
        }
    }
}

impl std::error::Error for DiagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            DiagError::ChannelError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ChannelError> for DiagError {
    fn from(x: ChannelError) -> Self {
        Self::ChannelError(x)
    }
}

impl DiagError {
    /// Returns true if the error is one a caller may reasonably retry the
    /// transaction after (timeouts, link glitches, busy ECUs). Fatal errors
    /// (I/O failure, rejected channel setup, echo mismatches) return false.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DiagError::Timeout(_)
            | DiagError::InvalidFrame(_)
            | DiagError::BadChecksum { .. }
            | DiagError::AckTimeout(_)
            | DiagError::SequenceError { .. }
            | DiagError::NegativeResponse { .. }
            | DiagError::EmptyResponse => true,
            DiagError::Ds2Status(s) => *s == ds2::Ds2Status::Busy,
            _ => false,
        }
    }
}

/// Converts a single byte into a BCD string
pub fn bcd_decode(input: u8) -> String {
    format!("{}{}", (input & 0xF0) >> 4, input & 0x0F)
}

/// Converts a slice to a BCD string
pub fn bcd_decode_slice(input: &[u8], sep: Option<&str>) -> String {
    let mut res = String::new();
    for (pos, x) in input.iter().enumerate() {
        res.push_str(bcd_decode(*x).as_str());
        if let Some(separator) = sep {
            if pos != input.len() - 1 {
                res.push_str(separator)
            }
        }
    }
    res
}
