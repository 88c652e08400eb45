//! Data read services: freeze frames (0x12), ECU identification (0x1A),
//! local/common identifier reads (0x21/0x22) and data rates (0x26)

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// Parsed response of [Kwp2000Client::read_freeze_frame_data]
#[derive(Debug, Clone)]
pub struct FreezeFrameResponse {
    /// Echo of the requested freeze frame number
    pub freeze_frame_number: u8,
    /// Freeze frame data bytes
    pub data: Vec<u8>,
}

/// Parsed response of [Kwp2000Client::read_data_by_local_identifier]
#[derive(Debug, Clone)]
pub struct LocalIdentifierResponse {
    /// Echo of the requested local identifier
    pub local_identifier: u8,
    /// The data bytes read
    pub data: Vec<u8>,
}

/// Parsed response of [Kwp2000Client::read_data_by_common_identifier]
#[derive(Debug, Clone)]
pub struct CommonIdentifierResponse {
    /// Echo of the low byte of the requested common identifier
    pub common_identifier_low: u8,
    /// The data bytes read
    pub data: Vec<u8>,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Reads one stored freeze frame
    pub fn read_freeze_frame_data(
        &mut self,
        freeze_frame_number: u8,
    ) -> DiagServerResult<FreezeFrameResponse> {
        let resp = self.send_request(KwpCommand::ReadFreezeFrameData, &[freeze_frame_number])?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != freeze_frame_number {
            return Err(DiagError::MismatchedEcho("freeze frame number"));
        }
        Ok(FreezeFrameResponse {
            freeze_frame_number: resp[0],
            data: resp[1..].to_vec(),
        })
    }

    /// Reads ECU identification data. `option` selects the identification
    /// block on ECUs that support more than one; the raw bytes are returned.
    /// Part numbers within are typically BCD coded, see
    /// [crate::bcd_decode_slice]
    pub fn read_ecu_identification(&mut self, option: Option<u8>) -> DiagServerResult<Vec<u8>> {
        let args: &[u8] = match &option {
            Some(o) => std::slice::from_ref(o),
            None => &[],
        };
        self.send_request(KwpCommand::ReadEcuIdentification, args)
    }

    /// Reads a data record by its one byte local identifier
    pub fn read_data_by_local_identifier(
        &mut self,
        local_identifier: u8,
    ) -> DiagServerResult<LocalIdentifierResponse> {
        let resp =
            self.send_request(KwpCommand::ReadDataByLocalIdentifier, &[local_identifier])?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != local_identifier {
            return Err(DiagError::MismatchedEcho("local identifier"));
        }
        Ok(LocalIdentifierResponse {
            local_identifier: resp[0],
            data: resp[1..].to_vec(),
        })
    }

    /// Reads a data record by its 16-bit common identifier. Per the BMW
    /// catalog, the positive response echoes only the low identifier byte
    pub fn read_data_by_common_identifier(
        &mut self,
        common_identifier: u16,
    ) -> DiagServerResult<CommonIdentifierResponse> {
        let args = [(common_identifier >> 8) as u8, common_identifier as u8];
        let resp = self.send_request(KwpCommand::ReadDataByCommonIdentifier, &args)?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != common_identifier as u8 {
            return Err(DiagError::MismatchedEcho("common identifier"));
        }
        Ok(CommonIdentifierResponse {
            common_identifier_low: resp[0],
            data: resp[1..].to_vec(),
        })
    }

    /// Sets the periodic transmission data rate. Returns the echoed rate
    /// identifier
    pub fn set_data_rates(&mut self, data_rate_identifier: u8) -> DiagServerResult<u8> {
        let resp = self.send_request(KwpCommand::SetDataRates, &[data_rate_identifier])?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != data_rate_identifier {
            return Err(DiagError::MismatchedEcho("data rate identifier"));
        }
        Ok(resp[0])
    }
}
