//! Upload/download services (0x34 - 0x37) used for ECU flashing

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{
    memory::{pack_address, unpack_address},
    Kwp2000Client, KwpCommand,
};

/// Parsed response of [Kwp2000Client::request_download] /
/// [Kwp2000Client::request_upload]
#[derive(Debug, Clone, Copy)]
pub struct TransferSetupResponse {
    /// Echo of the 24-bit memory address
    pub memory_address: u32,
    /// Echo of the 24-bit transfer size
    pub memory_size: u32,
    /// Maximum block length granted by the ECU, when it reports one
    pub max_block_length: Option<u8>,
}

/// Parsed response of [Kwp2000Client::transfer_data]
#[derive(Debug, Clone)]
pub struct TransferDataResponse {
    /// Echo of the block sequence counter
    pub block_sequence: u8,
    /// Transfer response parameters following the echo
    pub parameters: Vec<u8>,
}

fn transfer_setup(
    resp: Vec<u8>,
    memory_address: u32,
    memory_size: u32,
) -> DiagServerResult<TransferSetupResponse> {
    if resp.len() < 6 {
        return Err(DiagError::InvalidResponseLength);
    }
    let addr_echo = unpack_address(&resp[0..3]);
    let size_echo = unpack_address(&resp[3..6]);
    if addr_echo != memory_address {
        return Err(DiagError::MismatchedEcho("memory address"));
    }
    if size_echo != memory_size {
        return Err(DiagError::MismatchedEcho("memory size"));
    }
    Ok(TransferSetupResponse {
        memory_address: addr_echo,
        memory_size: size_echo,
        max_block_length: resp.get(6).copied(),
    })
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Requests a data download (tester to ECU) for the given 24-bit address
    /// and size. `compression` and `encryption` select the transfer encoding
    /// on ECUs that support one
    pub fn request_download(
        &mut self,
        memory_address: u32,
        memory_size: u32,
        compression: Option<u8>,
        encryption: Option<u8>,
    ) -> DiagServerResult<TransferSetupResponse> {
        let args = transfer_args(memory_address, memory_size, compression, encryption)?;
        let resp = self.send_request(KwpCommand::RequestDownload, &args)?;
        transfer_setup(resp, memory_address, memory_size)
    }

    /// Requests a data upload (ECU to tester) for the given 24-bit address
    /// and size
    pub fn request_upload(
        &mut self,
        memory_address: u32,
        memory_size: u32,
        compression: Option<u8>,
        encryption: Option<u8>,
    ) -> DiagServerResult<TransferSetupResponse> {
        let args = transfer_args(memory_address, memory_size, compression, encryption)?;
        let resp = self.send_request(KwpCommand::RequestUpload, &args)?;
        transfer_setup(resp, memory_address, memory_size)
    }

    /// Transfers one data block. The block sequence counter starts at 1 and
    /// is echoed by the ECU
    pub fn transfer_data(
        &mut self,
        block_sequence: u8,
        data: &[u8],
    ) -> DiagServerResult<TransferDataResponse> {
        let mut args = vec![block_sequence];
        args.extend_from_slice(data);
        let resp = self.send_request(KwpCommand::TransferData, &args)?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != block_sequence {
            return Err(DiagError::MismatchedEcho("block sequence"));
        }
        Ok(TransferDataResponse {
            block_sequence: resp[0],
            parameters: resp[1..].to_vec(),
        })
    }

    /// Exits the active transfer. Returns any transfer response parameters
    pub fn request_transfer_exit(
        &mut self,
        parameters: Option<&[u8]>,
    ) -> DiagServerResult<Vec<u8>> {
        self.send_request(KwpCommand::RequestTransferExit, parameters.unwrap_or(&[]))
    }
}

fn transfer_args(
    memory_address: u32,
    memory_size: u32,
    compression: Option<u8>,
    encryption: Option<u8>,
) -> DiagServerResult<Vec<u8>> {
    if memory_size > 0xFF_FFFF {
        return Err(DiagError::ParameterInvalid);
    }
    let addr = pack_address(memory_address)?;
    let mut args = vec![
        addr[0],
        addr[1],
        addr[2],
        (memory_size >> 16) as u8,
        (memory_size >> 8) as u8,
        memory_size as u8,
    ];
    if let Some(c) = compression {
        args.push(c);
        if let Some(e) = encryption {
            args.push(e);
        }
    }
    Ok(args)
}
