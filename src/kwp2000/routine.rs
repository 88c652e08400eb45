//! Routine management services, both by local identifier (0x31 - 0x33) and by
//! memory address (0x38 - 0x3A)

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{
    memory::{pack_address, unpack_address},
    Kwp2000Client, KwpCommand,
};

/// Control type for [Kwp2000Client::routine_control]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RoutineControlType {
    /// Start the routine
    StartRoutine = 0x01,
    /// Stop the routine
    StopRoutine = 0x02,
    /// Request the routine's results
    RequestRoutineResults = 0x03,
}

/// Parsed response of [Kwp2000Client::routine_control]
#[derive(Debug, Clone, Copy)]
pub struct RoutineControlResponse {
    /// Echo of the control type
    pub control_type: u8,
    /// Echo of the 16-bit routine identifier
    pub routine_id: u16,
}

/// Parsed response of [Kwp2000Client::request_routine_results_by_local_identifier]
#[derive(Debug, Clone)]
pub struct RoutineResultsResponse {
    /// Echo of the 16-bit routine identifier
    pub routine_id: u16,
    /// Routine result bytes
    pub results: Vec<u8>,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Runs the combined `RoutineControl` service (0x31) with an explicit
    /// control type. Both the control type and the routine id echoes are
    /// validated
    pub fn routine_control(
        &mut self,
        control_type: RoutineControlType,
        routine_id: u16,
    ) -> DiagServerResult<RoutineControlResponse> {
        let args = [
            control_type as u8,
            (routine_id >> 8) as u8,
            routine_id as u8,
        ];
        let resp = self.send_request(KwpCommand::StartRoutineByLocalIdentifier, &args)?;
        if resp.len() < 3 {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != control_type as u8 {
            return Err(DiagError::MismatchedEcho("control type"));
        }
        let id_echo = (resp[1] as u16) << 8 | resp[2] as u16;
        if id_echo != routine_id {
            return Err(DiagError::MismatchedEcho("routine identifier"));
        }
        Ok(RoutineControlResponse {
            control_type: resp[0],
            routine_id: id_echo,
        })
    }

    /// Starts a routine by its 16-bit identifier
    pub fn start_routine(&mut self, routine_id: u16) -> DiagServerResult<RoutineControlResponse> {
        self.routine_control(RoutineControlType::StartRoutine, routine_id)
    }

    /// Stops a routine with the dedicated `StopRoutineByLocalIdentifier`
    /// service (0x32)
    pub fn stop_routine_by_local_identifier(&mut self, routine_id: u16) -> DiagServerResult<()> {
        let args = [(routine_id >> 8) as u8, routine_id as u8];
        let resp = self.send_request(KwpCommand::StopRoutineByLocalIdentifier, &args)?;
        if resp.len() < 2 {
            return Err(DiagError::InvalidResponseLength);
        }
        if (resp[0] as u16) << 8 | resp[1] as u16 != routine_id {
            return Err(DiagError::MismatchedEcho("routine identifier"));
        }
        Ok(())
    }

    /// Requests the results of a routine (0x33). Note that some routines exit
    /// on their own and do not need to be stopped first
    pub fn request_routine_results_by_local_identifier(
        &mut self,
        routine_id: u16,
    ) -> DiagServerResult<RoutineResultsResponse> {
        let args = [(routine_id >> 8) as u8, routine_id as u8];
        let resp =
            self.send_request(KwpCommand::RequestRoutineResultsByLocalIdentifier, &args)?;
        if resp.len() < 2 {
            return Err(DiagError::InvalidResponseLength);
        }
        let id_echo = (resp[0] as u16) << 8 | resp[1] as u16;
        if id_echo != routine_id {
            return Err(DiagError::MismatchedEcho("routine identifier"));
        }
        Ok(RoutineResultsResponse {
            routine_id: id_echo,
            results: resp[2..].to_vec(),
        })
    }

    /// Starts a routine located at a 24-bit memory address (0x38)
    pub fn start_routine_by_address(
        &mut self,
        memory_address: u32,
        entry_options: Option<&[u8]>,
    ) -> DiagServerResult<()> {
        let addr = pack_address(memory_address)?;
        let mut args = addr.to_vec();
        if let Some(options) = entry_options {
            args.extend_from_slice(options);
        }
        let resp = self.send_request(KwpCommand::StartRoutineByAddress, &args)?;
        self.check_address_echo(&resp, memory_address)?;
        Ok(())
    }

    /// Stops a routine located at a 24-bit memory address (0x39)
    pub fn stop_routine_by_address(&mut self, memory_address: u32) -> DiagServerResult<()> {
        let addr = pack_address(memory_address)?;
        let resp = self.send_request(KwpCommand::StopRoutineByAddress, &addr)?;
        self.check_address_echo(&resp, memory_address)?;
        Ok(())
    }

    /// Requests the results of a routine located at a 24-bit memory address
    /// (0x3A). Returns the result bytes following the address echo
    pub fn request_routine_results_by_address(
        &mut self,
        memory_address: u32,
    ) -> DiagServerResult<Vec<u8>> {
        let addr = pack_address(memory_address)?;
        let resp = self.send_request(KwpCommand::RequestRoutineResultsByAddress, &addr)?;
        self.check_address_echo(&resp, memory_address)?;
        Ok(resp[3..].to_vec())
    }

    fn check_address_echo(&self, resp: &[u8], memory_address: u32) -> DiagServerResult<()> {
        if resp.len() < 3 {
            return Err(DiagError::InvalidResponseLength);
        }
        if unpack_address(resp) != memory_address {
            return Err(DiagError::MismatchedEcho("memory address"));
        }
        Ok(())
    }
}
