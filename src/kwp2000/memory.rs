//! Memory and identifier write services (0x23, 0x3D, 0x3B, 0x2E, 0x2C)
//!
//! `ReadMemoryByAddress` exists in two incompatible shapes in the field: the
//! plain form whose positive response carries the memory address echo in its
//! last three bytes, and the memory-type form whose response is data only.
//! Both are exposed as distinct operations here.

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// Packs a 24-bit memory address big-endian, rejecting out of range values
pub(crate) fn pack_address(address: u32) -> DiagServerResult<[u8; 3]> {
    if address > 0xFF_FFFF {
        return Err(DiagError::ParameterInvalid);
    }
    Ok([(address >> 16) as u8, (address >> 8) as u8, address as u8])
}

pub(crate) fn unpack_address(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

/// Periodic transmission modes for [Kwp2000Client::read_memory_by_address]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TransmissionMode {
    /// Respond once
    Single = 0x01,
    /// Respond periodically at slow rate
    Slow = 0x02,
    /// Respond periodically at medium rate
    Medium = 0x03,
    /// Respond periodically at fast rate
    Fast = 0x04,
    /// Stop periodic responses
    Stop = 0x05,
}

/// Parsed response of [Kwp2000Client::read_memory_by_address]
#[derive(Debug, Clone)]
pub struct ReadMemoryResponse {
    /// The memory bytes read
    pub record_values: Vec<u8>,
    /// Echo of the requested 24-bit memory address (trailing bytes of the
    /// positive response)
    pub memory_address_echo: u32,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Reads ECU memory by 24-bit address. The positive response ends with a
    /// three byte address echo which is validated against the request.
    ///
    /// `transmission_mode` and `max_responses` configure periodic responses
    /// on ECUs that support them; most callers pass `None`
    pub fn read_memory_by_address(
        &mut self,
        memory_address: u32,
        memory_size: u8,
        transmission_mode: Option<TransmissionMode>,
        max_responses: Option<u8>,
    ) -> DiagServerResult<ReadMemoryResponse> {
        let addr = pack_address(memory_address)?;
        let mut args = vec![addr[0], addr[1], addr[2], memory_size];
        if let Some(mode) = transmission_mode {
            args.push(mode as u8);
            if let Some(max) = max_responses {
                args.push(max);
            }
        }
        let resp = self.send_request(KwpCommand::ReadMemoryByAddress, &args)?;
        if resp.len() < 3 {
            return Err(DiagError::InvalidResponseLength);
        }
        let echo = unpack_address(&resp[resp.len() - 3..]);
        if echo != memory_address {
            return Err(DiagError::MismatchedEcho("memory address"));
        }
        Ok(ReadMemoryResponse {
            record_values: resp[..resp.len() - 3].to_vec(),
            memory_address_echo: echo,
        })
    }

    /// Reads ECU memory by 24-bit address and memory type selector. This
    /// variant's positive response carries data only, with no address echo
    pub fn read_memory_by_address_typed(
        &mut self,
        memory_address: u32,
        memory_type: u8,
        memory_size: u8,
    ) -> DiagServerResult<Vec<u8>> {
        let addr = pack_address(memory_address)?;
        self.send_request(
            KwpCommand::ReadMemoryByAddress,
            &[addr[0], addr[1], addr[2], memory_type, memory_size],
        )
    }

    /// Writes `data` to ECU memory by 24-bit address. The positive response
    /// echoes the address
    pub fn write_memory_by_address(
        &mut self,
        memory_address: u32,
        data: &[u8],
    ) -> DiagServerResult<()> {
        if data.is_empty() || data.len() > 0xFF {
            return Err(DiagError::ParameterInvalid);
        }
        let addr = pack_address(memory_address)?;
        let mut args = vec![addr[0], addr[1], addr[2], data.len() as u8];
        args.extend_from_slice(data);
        let resp = self.send_request(KwpCommand::WriteMemoryByAddress, &args)?;
        if resp.len() < 3 {
            return Err(DiagError::InvalidResponseLength);
        }
        if unpack_address(&resp) != memory_address {
            return Err(DiagError::MismatchedEcho("memory address"));
        }
        Ok(())
    }

    /// Writes a data record by its one byte local identifier
    pub fn write_data_by_local_identifier(
        &mut self,
        local_identifier: u8,
        data: &[u8],
    ) -> DiagServerResult<()> {
        let mut args = vec![local_identifier];
        args.extend_from_slice(data);
        let resp = self.send_request(KwpCommand::WriteDataByLocalIdentifier, &args)?;
        if resp.first() != Some(&local_identifier) {
            return Err(DiagError::MismatchedEcho("local identifier"));
        }
        Ok(())
    }

    /// Writes a data record by its 16-bit common identifier
    pub fn write_data_by_common_identifier(
        &mut self,
        common_identifier: u16,
        data: &[u8],
    ) -> DiagServerResult<()> {
        let mut args = vec![(common_identifier >> 8) as u8, common_identifier as u8];
        args.extend_from_slice(data);
        let resp = self.send_request(KwpCommand::WriteDataByCommonIdentifier, &args)?;
        if resp.len() < 2 {
            return Err(DiagError::InvalidResponseLength);
        }
        let echo = (resp[0] as u16) << 8 | resp[1] as u16;
        if echo != common_identifier {
            return Err(DiagError::MismatchedEcho("common identifier"));
        }
        Ok(())
    }

    /// Dynamically defines a local identifier. `sub_function` selects the
    /// definition mode (define by identifier / by memory address / clear),
    /// `definition` carries the mode specific record
    pub fn dynamically_define_local_identifier(
        &mut self,
        sub_function: u8,
        definition: &[u8],
    ) -> DiagServerResult<()> {
        let mut args = vec![sub_function];
        args.extend_from_slice(definition);
        let resp = self.send_request(KwpCommand::DynamicallyDefineLocalIdentifier, &args)?;
        if resp.first() != Some(&sub_function) {
            return Err(DiagError::MismatchedEcho("sub function"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_packing() {
        assert_eq!(pack_address(0x0077B0).unwrap(), [0x00, 0x77, 0xB0]);
        assert_eq!(unpack_address(&[0x00, 0x77, 0xB0]), 0x0077B0);
        assert!(pack_address(0x0100_0000).is_err());
    }
}
