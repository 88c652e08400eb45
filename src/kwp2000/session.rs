//! Diagnostic session control services (0x10, 0x20, 0x11) and the baud rate
//! identifier table used by `StartDiagnosticSession`

use strum_macros::FromRepr;

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// KWP2000 diagnostic session mode requested with `StartDiagnosticSession`
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticMode {
    /// Standard OBD2 mode. The ECU boots in this state and only
    /// non-intrusive services are available
    Obd2,
    /// ECU programming mode, used for flashing
    EcuProgramming,
    /// ECU development mode. Every service is available here; production
    /// ECUs may refuse to enter it
    EcuDevelopment,
    /// Manufacturer specific session mode not covered by the specification
    Custom(u8),
}

impl From<DiagnosticMode> for u8 {
    fn from(x: DiagnosticMode) -> Self {
        match x {
            DiagnosticMode::Obd2 => 0x81,
            DiagnosticMode::EcuProgramming => 0x85,
            DiagnosticMode::EcuDevelopment => 0x86,
            DiagnosticMode::Custom(c) => c,
        }
    }
}

/// Baud rate identifiers accepted by `StartDiagnosticSession` on serial links
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, FromRepr)]
#[repr(u8)]
pub enum BaudrateIdentifier {
    /// 9.600 baud
    Baud9600 = 0x01,
    /// 19.200 baud
    Baud19200 = 0x02,
    /// 38.400 baud
    Baud38400 = 0x03,
    /// 57.600 baud
    Baud57600 = 0x04,
    /// 115.200 baud
    Baud115200 = 0x05,
    /// 125.000 baud
    Baud125000 = 0x06,
    /// 10.400 baud
    Baud10400 = 0x14,
    /// 20.800 baud
    Baud20800 = 0x34,
}

impl BaudrateIdentifier {
    /// Returns the baud rate value the identifier encodes
    pub fn baud(&self) -> u32 {
        match self {
            Self::Baud9600 => 9600,
            Self::Baud19200 => 19200,
            Self::Baud38400 => 38400,
            Self::Baud57600 => 57600,
            Self::Baud115200 => 115200,
            Self::Baud125000 => 125000,
            Self::Baud10400 => 10400,
            Self::Baud20800 => 20800,
        }
    }

    /// Looks up the identifier for a baud rate value
    pub fn from_baud(baud: u32) -> Option<Self> {
        match baud {
            9600 => Some(Self::Baud9600),
            19200 => Some(Self::Baud19200),
            38400 => Some(Self::Baud38400),
            57600 => Some(Self::Baud57600),
            115200 => Some(Self::Baud115200),
            125000 => Some(Self::Baud125000),
            10400 => Some(Self::Baud10400),
            20800 => Some(Self::Baud20800),
            _ => None,
        }
    }

    /// Looks up the identifier for a raw identifier byte
    pub fn from_identifier(id: u8) -> Option<Self> {
        Self::from_repr(id)
    }
}

/// Parsed response of [Kwp2000Client::start_diagnostic_session]
#[derive(Debug, Clone, Copy)]
pub struct StartSessionResponse {
    /// Echo of the requested diagnostic mode
    pub diagnostic_mode: u8,
    /// Echo of the requested baud rate identifier, when one was requested
    pub baudrate_identifier: Option<u8>,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Starts (or changes) the ECU diagnostic session mode, optionally
    /// requesting a new link baud rate.
    ///
    /// Note that on serial STAR links a granted baud rate change only takes
    /// effect once the tester re-bauds its own side, see
    /// [StarSerialTransport](crate::star::serial::StarSerialTransport)
    pub fn start_diagnostic_session(
        &mut self,
        mode: DiagnosticMode,
        baudrate: Option<BaudrateIdentifier>,
    ) -> DiagServerResult<StartSessionResponse> {
        let mode_byte: u8 = mode.into();
        let mut args = vec![mode_byte];
        if let Some(b) = baudrate {
            args.push(b as u8);
        }
        let resp = self.send_request(KwpCommand::StartDiagnosticSession, &args)?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != mode_byte {
            return Err(DiagError::MismatchedEcho("diagnostic mode"));
        }
        let baud_echo = resp.get(1).copied();
        if let (Some(req), Some(echo)) = (baudrate, baud_echo) {
            if req as u8 != echo {
                return Err(DiagError::MismatchedEcho("baud rate identifier"));
            }
        }
        Ok(StartSessionResponse {
            diagnostic_mode: resp[0],
            baudrate_identifier: baud_echo,
        })
    }

    /// Stops the active diagnostic session, returning the ECU to its default
    /// mode
    pub fn stop_diagnostic_session(&mut self) -> DiagServerResult<()> {
        self.send_request(KwpCommand::StopDiagnosticSession, &[])?;
        Ok(())
    }

    /// Resets the ECU. Returns the echoed reset type, when the ECU sends one
    pub fn ecu_reset(&mut self, reset_type: u8) -> DiagServerResult<Option<u8>> {
        let resp = self.send_request(KwpCommand::ECUReset, &[reset_type])?;
        if let Some(echo) = resp.first() {
            if *echo != reset_type {
                return Err(DiagError::MismatchedEcho("reset type"));
            }
        }
        Ok(resp.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_identifier_round_trip() {
        for baud in [10400, 9600, 19200, 20800, 38400, 57600, 115200, 125000] {
            let id = BaudrateIdentifier::from_baud(baud).unwrap();
            assert_eq!(id.baud(), baud);
            assert_eq!(BaudrateIdentifier::from_identifier(id as u8), Some(id));
        }
        assert!(BaudrateIdentifier::from_baud(921600).is_none());
        assert!(BaudrateIdentifier::from_identifier(0x99).is_none());
    }

    #[test]
    fn diagnostic_mode_bytes() {
        assert_eq!(u8::from(DiagnosticMode::Obd2), 0x81);
        assert_eq!(u8::from(DiagnosticMode::EcuProgramming), 0x85);
        assert_eq!(u8::from(DiagnosticMode::EcuDevelopment), 0x86);
        assert_eq!(u8::from(DiagnosticMode::Custom(0x89)), 0x89);
    }
}
