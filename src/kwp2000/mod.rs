//! Module for KWP2000 (Keyword protocol 2000 - ISO14230)
//!
//! This module implements the BMW flavoured KWP2000 service catalog as spoken
//! over the STAR serial line, STAR-on-CAN and VW TP 2.0 transports. It covers
//! the standard diagnostic services (session control, data/memory access,
//! DTC handling, IO control, routines, upload/download) as well as the
//! communication services (`StartCommunication`, `StopCommunication`,
//! `AccessTimingParameter`, `SendData`) and the non-standard `EscCode`
//! service.
//!
//! The client is transport agnostic: anything implementing
//! [PayloadTransport] will do.

use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::{
    channel::{ChannelError, PayloadTransport},
    DiagError, DiagServerResult,
};

pub mod communication;
pub mod dtc;
pub mod error;
pub mod ioctl;
pub mod memory;
pub mod read_data;
pub mod routine;
pub mod security_access;
pub mod session;
pub mod timing;
pub mod transfer;

pub use error::KwpError;

/// KWP Command Service IDs.
///
/// Note. This does not cover the 'Reserved' and 'System supplier specific'
/// ranges
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum KwpCommand {
    /// Start or change ECU diagnostic session mode. See [session]
    StartDiagnosticSession = 0x10,
    /// Reset the ECU. See [session]
    ECUReset = 0x11,
    /// Reads stored freeze frame data. See [read_data]
    ReadFreezeFrameData = 0x12,
    /// Reads DTCs stored on the ECU. See [dtc]
    ReadDiagnosticTroubleCodes = 0x13,
    /// Clears diagnostic information stored on the ECU. See [dtc]
    ClearDiagnosticInformation = 0x14,
    /// Reads the DTC status byte. See [dtc]
    ReadStatusOfDiagnosticTroubleCodes = 0x17,
    /// Reads DTCs matching a status mask. See [dtc]
    ReadDiagnosticTroubleCodesByStatus = 0x18,
    /// Reads ECU identification data. See [read_data]
    ReadEcuIdentification = 0x1A,
    /// Stops the active diagnostic session. See [session]
    StopDiagnosticSession = 0x20,
    /// Reads data from the ECU using a local identifier. See [read_data]
    ReadDataByLocalIdentifier = 0x21,
    /// Reads data from the ECU using a 16-bit common identifier. See [read_data]
    ReadDataByCommonIdentifier = 0x22,
    /// Reads memory from the ECU by address. See [memory]
    ReadMemoryByAddress = 0x23,
    /// Sets the periodic transmission data rate. See [read_data]
    SetDataRates = 0x26,
    /// Security access functions. See [security_access]
    SecurityAccess = 0x27,
    /// Defines a local identifier dynamically. See [memory]
    DynamicallyDefineLocalIdentifier = 0x2C,
    /// Writes data using a 16-bit common identifier. See [memory]
    WriteDataByCommonIdentifier = 0x2E,
    /// Input/output control by common identifier. See [ioctl]
    InputOutputControlByCommonIdentifier = 0x2F,
    /// Input/output control by local identifier. See [ioctl]
    InputOutputControlByLocalIdentifier = 0x30,
    /// Starts a routine by local identifier. See [routine]
    StartRoutineByLocalIdentifier = 0x31,
    /// Stops a routine by local identifier. See [routine]
    StopRoutineByLocalIdentifier = 0x32,
    /// Requests routine results by local identifier. See [routine]
    RequestRoutineResultsByLocalIdentifier = 0x33,
    /// Requests a download (tester to ECU). See [transfer]
    RequestDownload = 0x34,
    /// Requests an upload (ECU to tester). See [transfer]
    RequestUpload = 0x35,
    /// Transfers one data block. See [transfer]
    TransferData = 0x36,
    /// Exits the transfer. See [transfer]
    RequestTransferExit = 0x37,
    /// Starts a routine by memory address. See [routine]
    StartRoutineByAddress = 0x38,
    /// Stops a routine by memory address. See [routine]
    StopRoutineByAddress = 0x39,
    /// Requests routine results by memory address. See [routine]
    RequestRoutineResultsByAddress = 0x3A,
    /// Writes data using a local identifier. See [memory]
    WriteDataByLocalIdentifier = 0x3B,
    /// Writes memory by address. See [memory]
    WriteMemoryByAddress = 0x3D,
    /// Keeps the diagnostic session alive. See [communication]
    TesterPresent = 0x3E,
    /// BMW specific escape code service. See [communication]
    EscCode = 0x80,
    /// Starts communication with the ECU. See [communication]
    StartCommunication = 0x81,
    /// Stops communication with the ECU. See [communication]
    StopCommunication = 0x82,
    /// Reads or writes the session timing parameters. See [timing]
    AccessTimingParameter = 0x83,
    /// Transmits raw data to the ECU. See [communication]
    SendData = 0x84,
}

/// Negative response service identifier
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// NRC meaning "request correctly received, response pending". Never surfaces
/// from the client; the wait loop absorbs it
pub const NRC_RESPONSE_PENDING: u8 = 0x78;

/// Returns the positive response service identifier for a request service
/// identifier.
///
/// Most services respond with `sid + 0x40`; `TesterPresent`, `EscCode` and
/// `AccessTimingParameter` carry the published exceptions
pub fn positive_response_id(sid: u8) -> u8 {
    match sid {
        0x3E => 0x7E,
        0x80 => 0xC0,
        0x83 => 0xC3,
        x => x.wrapping_add(0x40),
    }
}

/// KWP2000 client bound to a payload transport.
///
/// All typed service methods validate any identifier the ECU echoes back
/// against the request and fail with [DiagError::MismatchedEcho] on
/// divergence. The pending NRC (0x78) is absorbed internally: the client
/// keeps waiting until a real response arrives or the transaction timeout
/// expires.
#[derive(Debug)]
pub struct Kwp2000Client<T: PayloadTransport> {
    transport: T,
    open: bool,
    timeout: Duration,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Creates a new client over the given transport with the default
    /// 1 second transaction timeout
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            open: false,
            timeout: Duration::from_secs(1),
        }
    }

    /// Sets the transaction timeout. This bounds the whole wait including any
    /// pending (NRC 0x78) frames received in between
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Grants access to the underlying transport, for transport specific
    /// operations such as
    /// [set_access_timings](crate::star::serial::StarSerialTransport::set_access_timings)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Opens the transport. For TP 2.0 this performs channel setup and
    /// parameter negotiation
    pub fn open(&mut self) -> DiagServerResult<()> {
        self.transport.open()?;
        self.open = true;
        Ok(())
    }

    /// Closes the transport. For TP 2.0 this disconnects the channel
    pub fn close(&mut self) -> DiagServerResult<()> {
        let res = self.transport.close();
        self.open = false;
        res
    }

    /// Returns true while the client is open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Sends a command to the ECU and waits for its response.
    ///
    /// ## Returns
    /// On a positive response, the response body with the positive service
    /// identifier stripped. On a negative response,
    /// [DiagError::NegativeResponse] with the NRC definition resolved from
    /// the fixed table
    pub fn send_request(&mut self, sid: KwpCommand, args: &[u8]) -> DiagServerResult<Vec<u8>> {
        self.send_request_with_timeout(sid, args, self.timeout)
    }

    /// Same as [Self::send_request] with an explicit transaction timeout
    pub fn send_request_with_timeout(
        &mut self,
        sid: KwpCommand,
        args: &[u8],
        timeout: Duration,
    ) -> DiagServerResult<Vec<u8>> {
        self.write_request(sid, args)?;
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DiagError::Timeout("KWP2000 response"));
            }
            let resp = match self.transport.wait_frame(deadline - now)? {
                Some(r) => r,
                None => continue,
            };
            if resp.is_empty() {
                return Err(DiagError::EmptyResponse);
            }
            if resp[0] == NEGATIVE_RESPONSE_SID {
                if resp.len() < 3 {
                    return Err(DiagError::InvalidResponseLength);
                }
                if resp[2] == NRC_RESPONSE_PENDING {
                    warn!("ECU responded with responsePending, continuing to wait");
                    continue;
                }
                error!("ECU negative response 0x{:02X}", resp[2]);
                return Err(DiagError::NegativeResponse {
                    sid: resp[1],
                    code: resp[2],
                    def: Some(KwpError::from(resp[2]).desc().into()),
                });
            }
            let expected = positive_response_id(sid as u8);
            if resp[0] != expected {
                error!(
                    "ECU SID mismatch. Expected positive SID 0x{:02X}, got 0x{:02X}",
                    expected, resp[0]
                );
                return Err(DiagError::WrongMessage);
            }
            debug!("ECU SID matches request");
            return Ok(resp[1..].to_vec());
        }
    }

    /// Sends a command without waiting for any response (fire and forget)
    pub fn send_no_response(&mut self, sid: KwpCommand, args: &[u8]) -> DiagServerResult<()> {
        self.write_request(sid, args)
    }

    fn write_request(&mut self, sid: KwpCommand, args: &[u8]) -> DiagServerResult<()> {
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        let mut req = Vec::with_capacity(args.len() + 1);
        req.push(sid as u8);
        req.extend_from_slice(args);
        debug!("KWP2000 request: {req:02X?}");
        self.transport.send(&req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_id_law() {
        for sid in 0x10u8..=0x84 {
            let expected = match sid {
                0x3E => 0x7E,
                0x80 => 0xC0,
                0x83 => 0xC3,
                x => x + 0x40,
            };
            assert_eq!(positive_response_id(sid), expected, "sid 0x{sid:02X}");
        }
    }
}
