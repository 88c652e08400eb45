//! Typed DS2 service codecs: identification and direct memory access

use crate::{channel::ByteChannel, DiagError, DiagServerResult};

use super::Ds2Client;

/// Well known DS2 ECU addresses
pub mod ecu_address {
    /// Engine control (DME/Motronic)
    pub const MOTRONIC: u8 = 0x12;
    /// Automatic transmission control (EGS)
    pub const AUTOMATIC_TRANSMISSION: u8 = 0x32;
    /// Instrument cluster
    pub const IKE: u8 = 0x80;
    /// Light control module
    pub const LCM: u8 = 0xD0;
}

/// DS2 memory type selectors for the memory services
pub mod memory_type {
    /// Program ROM
    pub const ROM: u8 = 0x01;
    /// EEPROM
    pub const EEPROM: u8 = 0x03;
}

/// DS2 command identifiers
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Ds2Command {
    /// Read ECU identification
    Ident = 0x04,
    /// Read memory by type and address
    ReadMemory = 0x06,
    /// Write memory by type and address
    WriteMemory = 0x07,
}

/// Parsed response of [Ds2Client::read_memory]
#[derive(Debug, Clone)]
pub struct ReadMemoryResponse {
    /// Memory bytes read from the ECU
    pub memory_data: Vec<u8>,
    /// Echo of the requested memory type
    pub memory_type_echo: u8,
    /// Echo of the requested 24-bit memory address
    pub address_echo: u32,
    /// Echo of the requested read size
    pub size_echo: u8,
}

/// Parsed response of [Ds2Client::write_memory]
#[derive(Debug, Clone, Copy)]
pub struct WriteMemoryResponse {
    /// Echo of the requested memory type
    pub memory_type_echo: u8,
    /// Echo of the requested 24-bit memory address
    pub address_echo: u32,
    /// Echo of the written size
    pub size_echo: u8,
}

fn parse_memory_echo(data: &[u8]) -> DiagServerResult<(u8, u32, u8)> {
    if data.len() < 5 {
        return Err(DiagError::InvalidResponseLength);
    }
    let addr = ((data[1] as u32) << 16) | ((data[2] as u32) << 8) | data[3] as u32;
    Ok((data[0], addr, data[4]))
}

impl<C: ByteChannel> Ds2Client<C> {
    /// Requests ECU identification (command 0x04). Returns the raw
    /// identification bytes; part numbers within are typically BCD coded and
    /// can be rendered with [crate::bcd_decode_slice]
    pub fn ident(&mut self, addr: u8) -> DiagServerResult<Vec<u8>> {
        let resp = self.send_request(addr, &[Ds2Command::Ident as u8, 0x00])?;
        Ok(resp.data)
    }

    /// Reads `memory_size` bytes from ECU memory (command 0x06).
    ///
    /// The positive reply echoes the memory type, 24-bit address and size
    /// ahead of the data; each echo is validated against the request
    pub fn read_memory(
        &mut self,
        addr: u8,
        memory_type: u8,
        memory_address: u32,
        memory_size: u8,
    ) -> DiagServerResult<ReadMemoryResponse> {
        if memory_address > 0xFF_FFFF {
            return Err(DiagError::ParameterInvalid);
        }
        let req = [
            Ds2Command::ReadMemory as u8,
            memory_type,
            (memory_address >> 16) as u8,
            (memory_address >> 8) as u8,
            memory_address as u8,
            memory_size,
        ];
        let resp = self.send_request(addr, &req)?;
        let (type_echo, address_echo, size_echo) = parse_memory_echo(&resp.data)?;
        if type_echo != memory_type {
            return Err(DiagError::MismatchedEcho("memory type"));
        }
        if address_echo != memory_address {
            return Err(DiagError::MismatchedEcho("memory address"));
        }
        if size_echo != memory_size {
            return Err(DiagError::MismatchedEcho("memory size"));
        }
        Ok(ReadMemoryResponse {
            memory_data: resp.data[5..].to_vec(),
            memory_type_echo: type_echo,
            address_echo,
            size_echo,
        })
    }

    /// Writes `content` to ECU memory (command 0x07)
    pub fn write_memory(
        &mut self,
        addr: u8,
        memory_type: u8,
        memory_address: u32,
        content: &[u8],
    ) -> DiagServerResult<WriteMemoryResponse> {
        if memory_address > 0xFF_FFFF || content.len() > 0xFF {
            return Err(DiagError::ParameterInvalid);
        }
        let mut req = vec![
            Ds2Command::WriteMemory as u8,
            memory_type,
            (memory_address >> 16) as u8,
            (memory_address >> 8) as u8,
            memory_address as u8,
            content.len() as u8,
        ];
        req.extend_from_slice(content);
        let resp = self.send_request(addr, &req)?;
        let (type_echo, address_echo, size_echo) = parse_memory_echo(&resp.data)?;
        if type_echo != memory_type {
            return Err(DiagError::MismatchedEcho("memory type"));
        }
        if address_echo != memory_address {
            return Err(DiagError::MismatchedEcho("memory address"));
        }
        Ok(WriteMemoryResponse {
            memory_type_echo: type_echo,
            address_echo,
            size_echo,
        })
    }
}
