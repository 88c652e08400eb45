//! Functions for unlocking secure regions on the ECU (`SecurityAccess`, 0x27)
//!
//! This crate only transports seeds and keys; computing a key from a seed is
//! ECU specific and out of scope.

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// Parsed response of [Kwp2000Client::security_access]
#[derive(Debug, Clone)]
pub struct SecurityAccessResponse {
    /// Echo of the access type
    pub access_type: u8,
    /// Seed bytes (for a seed request) or acknowledge data (for a key send)
    pub data: Vec<u8>,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Raw security access exchange. `access_type` is the seed request level
    /// (odd) or key send level (even); `data` carries the key on a key send
    pub fn security_access(
        &mut self,
        access_type: u8,
        data: Option<&[u8]>,
    ) -> DiagServerResult<SecurityAccessResponse> {
        let mut args = vec![access_type];
        if let Some(d) = data {
            args.extend_from_slice(d);
        }
        let resp = self.send_request(KwpCommand::SecurityAccess, &args)?;
        if resp.is_empty() {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != access_type {
            return Err(DiagError::MismatchedEcho("access type"));
        }
        Ok(SecurityAccessResponse {
            access_type: resp[0],
            data: resp[1..].to_vec(),
        })
    }

    /// Requests a seed from the ECU.
    ///
    /// ## Parameters
    /// * access_mode - The access mode. Only odd numbers between 0x01-0x7F
    ///   are valid seed request levels
    ///
    /// ## Returns
    /// Just the ECU's seed bytes. An all zero seed conventionally means the
    /// requested level is already unlocked
    pub fn request_seed(&mut self, access_mode: u8) -> DiagServerResult<Vec<u8>> {
        if access_mode % 2 == 0 {
            return Err(DiagError::ParameterInvalid);
        }
        Ok(self.security_access(access_mode, None)?.data)
    }

    /// Attempts to unlock the access mode using a key computed from the seed
    /// provided by [Self::request_seed]. `access_mode` must be THE SAME as
    /// what was provided to the seed request
    pub fn unlock_with_key(&mut self, access_mode: u8, key: &[u8]) -> DiagServerResult<()> {
        if access_mode % 2 == 0 {
            return Err(DiagError::ParameterInvalid);
        }
        self.security_access(access_mode + 1, Some(key))?;
        Ok(())
    }
}
