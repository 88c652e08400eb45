//! Diagnostic trouble code services (0x13, 0x14, 0x17, 0x18)

use bitflags::bitflags;

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

bitflags! {
    /// Status byte attached to each DTC reported by
    /// `ReadDiagnosticTroubleCodesByStatus`, also usable as the request mask.
    /// Bits outside the named ones are manufacturer specific and retained
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct DtcStatus: u8 {
        /// The DTC illuminates the malfunction indicator lamp
        const MIL_ON = 0b1000_0000;
        /// Readiness flag for the monitoring cycle of this DTC
        const READINESS = 0b0001_0000;
        /// Request mask selecting every DTC
        const ALL = 0xFF;
    }
}

/// A single diagnostic trouble code as reported by the ECU
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Dtc {
    /// Raw two byte DTC code
    pub code: u16,
    /// Status byte, when the reporting service carries one
    pub status: Option<DtcStatus>,
}

impl Dtc {
    /// True if this DTC turns the malfunction indicator lamp on
    pub fn mil_on(&self) -> bool {
        self.status.is_some_and(|s| s.contains(DtcStatus::MIL_ON))
    }
}

/// Splits a DTC listing body into `(count, records)`, tolerating the optional
/// leading count byte some ECUs emit
fn split_count(body: &[u8], record_len: usize) -> DiagServerResult<(Option<u8>, &[u8])> {
    if body.len() % record_len == 0 {
        Ok((None, body))
    } else if body.len() % record_len == 1 {
        Ok((Some(body[0]), &body[1..]))
    } else {
        Err(DiagError::InvalidResponseLength)
    }
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Reads the DTCs stored on the ECU (`ReadDiagnosticTroubleCodes`).
    /// The reply is a flat list of two byte codes, optionally preceded by a
    /// count byte
    pub fn read_diagnostic_trouble_codes(&mut self) -> DiagServerResult<Vec<Dtc>> {
        let body = self.send_request(KwpCommand::ReadDiagnosticTroubleCodes, &[])?;
        let (_, records) = split_count(&body, 2)?;
        Ok(records
            .chunks_exact(2)
            .map(|c| Dtc {
                code: (c[0] as u16) << 8 | c[1] as u16,
                status: None,
            })
            .collect())
    }

    /// Clears diagnostic information for a DTC group. `group` 0xFF00
    /// traditionally selects all groups
    pub fn clear_diagnostic_information(&mut self, group: u16) -> DiagServerResult<()> {
        let args = [(group >> 8) as u8, group as u8];
        let resp = self.send_request(KwpCommand::ClearDiagnosticInformation, &args)?;
        if resp.len() >= 2 {
            let echo = (resp[0] as u16) << 8 | resp[1] as u16;
            if echo != group {
                return Err(DiagError::MismatchedEcho("DTC group"));
            }
        }
        Ok(())
    }

    /// Reads the global DTC status byte (`ReadStatusOfDiagnosticTroubleCodes`)
    pub fn read_status_of_dtc(&mut self) -> DiagServerResult<DtcStatus> {
        let resp = self.send_request(KwpCommand::ReadStatusOfDiagnosticTroubleCodes, &[])?;
        match resp.first() {
            Some(s) => Ok(DtcStatus::from_bits_retain(*s)),
            None => Err(DiagError::InvalidResponseLength),
        }
    }

    /// Reads the DTCs matching a status mask
    /// (`ReadDiagnosticTroubleCodesByStatus`). The reply lists
    /// `(code-high, code-low, status)` triples, optionally preceded by a
    /// count byte
    pub fn read_dtc_by_status(&mut self, mask: DtcStatus) -> DiagServerResult<Vec<Dtc>> {
        let body = self.send_request(
            KwpCommand::ReadDiagnosticTroubleCodesByStatus,
            &[mask.bits()],
        )?;
        let (_, records) = split_count(&body, 3)?;
        Ok(records
            .chunks_exact(3)
            .map(|c| Dtc {
                code: (c[0] as u16) << 8 | c[1] as u16,
                status: Some(DtcStatus::from_bits_retain(c[2])),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_count_shapes() {
        // without count byte
        let (count, rec) = split_count(&[0x12, 0x34, 0x56, 0x78], 2).unwrap();
        assert_eq!(count, None);
        assert_eq!(rec.len(), 4);
        // with count byte
        let (count, rec) = split_count(&[0x02, 0x12, 0x34, 0x56, 0x78], 2).unwrap();
        assert_eq!(count, Some(2));
        assert_eq!(rec.len(), 4);
        // garbage length
        assert!(split_count(&[0x01, 0x02, 0x03, 0x04, 0x05], 3).is_err());
    }
}
