//! Communication services: `StartCommunication` (0x81), `StopCommunication`
//! (0x82), `SendData` (0x84), `EscCode` (0x80) and `TesterPresent` (0x3E)

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// Value of the `TesterPresent` response-required byte
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseRequired {
    /// The ECU shall acknowledge the tester present message
    Yes = 0x01,
    /// The ECU shall stay silent. The client sends without waiting
    No = 0x02,
}

/// Key bytes returned by a positive `StartCommunication` response
#[derive(Debug, Clone, Copy)]
pub struct KeyBytes {
    /// First key byte
    pub key_byte_1: u8,
    /// Second key byte
    pub key_byte_2: u8,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Starts communication with the ECU, optionally offering key bytes.
    /// Returns the ECU's key bytes when the response carries them
    pub fn start_communication(
        &mut self,
        key_bytes: Option<&[u8]>,
    ) -> DiagServerResult<Option<KeyBytes>> {
        let resp =
            self.send_request(KwpCommand::StartCommunication, key_bytes.unwrap_or(&[]))?;
        Ok(if resp.len() >= 2 {
            Some(KeyBytes {
                key_byte_1: resp[0],
                key_byte_2: resp[1],
            })
        } else {
            None
        })
    }

    /// Stops communication with the ECU
    pub fn stop_communication(&mut self) -> DiagServerResult<()> {
        self.send_request(KwpCommand::StopCommunication, &[])?;
        Ok(())
    }

    /// Keeps the diagnostic session alive.
    ///
    /// With [ResponseRequired::Yes] this blocks until the ECU acknowledges.
    /// With [ResponseRequired::No] the message is fire-and-forget and the
    /// call returns as soon as the request is on the wire
    pub fn tester_present(&mut self, response: ResponseRequired) -> DiagServerResult<()> {
        match response {
            ResponseRequired::Yes => {
                self.send_request(KwpCommand::TesterPresent, &[ResponseRequired::Yes as u8])?;
                Ok(())
            }
            ResponseRequired::No => {
                self.send_no_response(KwpCommand::TesterPresent, &[ResponseRequired::No as u8])
            }
        }
    }

    /// Transmits raw data to the ECU with the `SendData` service. The
    /// positive response carries the ECU's data bytes back
    pub fn send_data(&mut self, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        if data.is_empty() {
            return Err(DiagError::ParameterInvalid);
        }
        self.send_request(KwpCommand::SendData, data)
    }

    /// BMW specific escape code service (0x80). Both request and response
    /// bodies are opaque to this crate
    pub fn esc_code(&mut self, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        self.send_request(KwpCommand::EscCode, data)
    }
}
