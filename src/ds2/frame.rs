//! DS2 frame codec
//!
//! A DS2 frame is `[addr, size, payload..., checksum]` where `size` counts
//! every octet of the frame (address, size byte, payload and checksum) and the
//! checksum is the XOR over all preceding bytes.

use crate::{DiagError, DiagServerResult};

/// XOR checksum over a DS2 message (everything except the checksum byte itself)
pub fn checksum(message: &[u8]) -> u8 {
    message.iter().fold(0, |acc, b| acc ^ b)
}

/// Builds a complete DS2 frame for the given target address and payload.
///
/// Fails with [DiagError::ParameterInvalid] if the framed size would exceed
/// the one byte size field (payload longer than 252 bytes)
pub fn build_frame(addr: u8, payload: &[u8]) -> DiagServerResult<Vec<u8>> {
    let size = 3 + payload.len();
    if size > 0xFF {
        return Err(DiagError::ParameterInvalid);
    }
    let mut frame = Vec::with_capacity(size);
    frame.push(addr);
    frame.push(size as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    Ok(frame)
}

/// Parses a complete DS2 frame, returning `(addr, payload)`
pub fn parse_frame(frame: &[u8]) -> DiagServerResult<(u8, Vec<u8>)> {
    if frame.len() < 3 {
        return Err(DiagError::InvalidFrame(format!(
            "DS2 frame too short ({} bytes)",
            frame.len()
        )));
    }
    let addr = frame[0];
    let size = frame[1] as usize;
    if size < 3 {
        return Err(DiagError::InvalidFrame(format!("invalid DS2 size byte {size}")));
    }
    if frame.len() < size {
        return Err(DiagError::InvalidFrame(format!(
            "DS2 frame truncated, size byte says {size} but only {} bytes present",
            frame.len()
        )));
    }
    let expected = checksum(&frame[..size - 1]);
    let got = frame[size - 1];
    if expected != got {
        return Err(DiagError::BadChecksum { expected, got });
    }
    Ok((addr, frame[2..size - 1].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let payloads: [&[u8]; 4] = [&[], &[0x00], &[0x04, 0x00], &[0xAA; 252]];
        for p in payloads {
            let frame = build_frame(0x12, p).unwrap();
            assert_eq!(frame[1] as usize, frame.len());
            let (addr, parsed) = parse_frame(&frame).unwrap();
            assert_eq!(addr, 0x12);
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn payload_too_large() {
        assert!(matches!(
            build_frame(0x12, &[0u8; 253]),
            Err(DiagError::ParameterInvalid)
        ));
    }

    #[test]
    fn short_frame_rejected() {
        assert!(matches!(
            parse_frame(&[0x12, 0x02]),
            Err(DiagError::InvalidFrame(_))
        ));
        // size byte below the structural minimum
        assert!(matches!(
            parse_frame(&[0x12, 0x02, 0x10]),
            Err(DiagError::InvalidFrame(_))
        ));
    }

    #[test]
    fn bad_checksum_rejected() {
        let mut frame = build_frame(0x80, &[0x06, 0x01]).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            parse_frame(&frame),
            Err(DiagError::BadChecksum { .. })
        ));
    }

    #[test]
    fn known_capture() {
        // Read memory request towards the DME, one byte at 0x0077B0
        let frame = build_frame(0x12, &[0x06, 0x01, 0x00, 0x77, 0xB0, 0x01]).unwrap();
        assert_eq!(frame[..8], [0x12, 0x09, 0x06, 0x01, 0x00, 0x77, 0xB0, 0x01]);
        assert_eq!(frame[8], checksum(&frame[..8]));
    }
}
