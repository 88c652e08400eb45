//! Input/output control services (0x2F, 0x30)

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// Parsed response of the IO control services
#[derive(Debug, Clone)]
pub struct IoControlResponse {
    /// Echo of the control parameter
    pub control_parameter: u8,
    /// Echoed control state, when present
    pub state: Vec<u8>,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Input/output control by 16-bit common identifier
    pub fn io_control_by_common_identifier(
        &mut self,
        common_identifier: u16,
        control_parameter: u8,
        control_state: Option<&[u8]>,
    ) -> DiagServerResult<IoControlResponse> {
        let mut args = vec![
            (common_identifier >> 8) as u8,
            common_identifier as u8,
            control_parameter,
        ];
        if let Some(state) = control_state {
            args.extend_from_slice(state);
        }
        let resp =
            self.send_request(KwpCommand::InputOutputControlByCommonIdentifier, &args)?;
        if resp.len() < 3 {
            return Err(DiagError::InvalidResponseLength);
        }
        let cid_echo = (resp[0] as u16) << 8 | resp[1] as u16;
        if cid_echo != common_identifier {
            return Err(DiagError::MismatchedEcho("common identifier"));
        }
        if resp[2] != control_parameter {
            return Err(DiagError::MismatchedEcho("control parameter"));
        }
        Ok(IoControlResponse {
            control_parameter: resp[2],
            state: resp[3..].to_vec(),
        })
    }

    /// Input/output control by one byte local identifier
    pub fn io_control_by_local_identifier(
        &mut self,
        local_identifier: u8,
        control_parameter: u8,
        control_state: Option<&[u8]>,
    ) -> DiagServerResult<IoControlResponse> {
        let mut args = vec![local_identifier, control_parameter];
        if let Some(state) = control_state {
            args.extend_from_slice(state);
        }
        let resp = self.send_request(KwpCommand::InputOutputControlByLocalIdentifier, &args)?;
        if resp.len() < 2 {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != local_identifier {
            return Err(DiagError::MismatchedEcho("local identifier"));
        }
        if resp[1] != control_parameter {
            return Err(DiagError::MismatchedEcho("control parameter"));
        }
        Ok(IoControlResponse {
            control_parameter: resp[1],
            state: resp[2..].to_vec(),
        })
    }
}
