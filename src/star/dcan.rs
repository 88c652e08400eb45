//! BMW-FAST telegrams over a serial CAN adapter (D-CAN)
//!
//! The adapter firmware exchanges CAN payloads as serial telegrams:
//! * short format, payload up to 0x3F bytes:
//!   `[0x80 | len, target, source, payload..., checksum]`
//! * long format, payload up to 0xFF bytes:
//!   `[0x80, target, source, len, payload..., checksum]`
//!
//! The checksum is the modulo 256 sum over the whole telegram ahead of it.
//! Received telegrams carry the address pair swapped.

use std::time::{Duration, Instant};

use log::debug;

use crate::{
    channel::{ByteChannel, ChannelError, PayloadTransport},
    kwp2000::timing::TimingParameters,
    DiagError, DiagServerResult,
};

use super::{LineBuffer, SRC_ADDR, TARGET_ADDR};

/// Window granted to the adapter's own echo after each transmission
const ECHO_WINDOW: Duration = Duration::from_millis(50);

/// Modulo 256 sum checksum over a BMW-FAST telegram
pub fn checksum(message: &[u8]) -> u8 {
    message.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encodes a payload into a BMW-FAST telegram, picking the short or long
/// format by payload length
pub fn encode_telegram(target: u8, source: u8, data: &[u8]) -> DiagServerResult<Vec<u8>> {
    if data.len() > 0xFF {
        return Err(DiagError::ParameterInvalid);
    }
    let mut telegram = if data.len() <= 0x3F {
        vec![0x80 | data.len() as u8, target, source]
    } else {
        vec![0x80, target, source, data.len() as u8]
    };
    telegram.extend_from_slice(data);
    telegram.push(checksum(&telegram));
    Ok(telegram)
}

/// Decodes a BMW-FAST telegram into `(target, source, payload)`
pub fn decode_telegram(telegram: &[u8]) -> DiagServerResult<(u8, u8, Vec<u8>)> {
    if telegram.len() < 4 {
        return Err(DiagError::InvalidFrame(format!(
            "BMW-FAST telegram too short ({} bytes)",
            telegram.len()
        )));
    }
    let first = telegram[0];
    if first & 0x80 == 0 {
        return Err(DiagError::InvalidFrame(format!(
            "bad BMW-FAST format byte 0x{first:02X}"
        )));
    }
    let (len, data_start) = if first == 0x80 {
        (telegram[3] as usize, 4)
    } else {
        ((first & 0x3F) as usize, 3)
    };
    let total = data_start + len + 1;
    if telegram.len() < total {
        return Err(DiagError::InvalidFrame(format!(
            "BMW-FAST telegram truncated, need {total} bytes, got {}",
            telegram.len()
        )));
    }
    let expected = checksum(&telegram[..total - 1]);
    let got = telegram[total - 1];
    if expected != got {
        return Err(DiagError::BadChecksum { expected, got });
    }
    Ok((
        telegram[1],
        telegram[2],
        telegram[data_start..total - 1].to_vec(),
    ))
}

/// D-CAN serial transport for [Kwp2000Client](crate::kwp2000::Kwp2000Client).
///
/// Like the plain STAR serial transport, the receive window is derived from
/// the active `p2max` timing parameter
#[derive(Debug)]
pub struct DcanSerialTransport<C: ByteChannel> {
    channel: C,
    target: u8,
    source: u8,
    access_timings: TimingParameters,
    open: bool,
    line: LineBuffer,
}

impl<C: ByteChannel> DcanSerialTransport<C> {
    /// Creates a transport with the default tester (0xF1) and ECU (0x12)
    /// addresses
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            target: TARGET_ADDR,
            source: SRC_ADDR,
            access_timings: TimingParameters::STANDARD,
            open: false,
            line: LineBuffer::default(),
        }
    }

    /// Overrides the target/source address pair
    pub fn set_addresses(&mut self, target: u8, source: u8) {
        self.target = target;
        self.source = source;
    }

    /// Swaps the timing parameter set the receive window is derived from
    pub fn set_access_timings(&mut self, timings: TimingParameters) {
        self.access_timings = timings;
    }

    fn read_telegram(&mut self) -> DiagServerResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + self.access_timings.p2max();
        // Scan for a format byte (0x80 bit set)
        let first = loop {
            match self.line.next_byte(&mut self.channel, deadline)? {
                None => return Ok(None),
                Some(b) if b & 0x80 != 0 => break b,
                Some(noise) => debug!("D-CAN discarding noise byte 0x{noise:02X}"),
            }
        };
        let mut telegram = vec![first];
        let header_rest = if first == 0x80 { 3 } else { 2 };
        for _ in 0..header_rest {
            match self.line.next_byte(&mut self.channel, deadline)? {
                Some(b) => telegram.push(b),
                None => return Err(DiagError::Timeout("BMW-FAST telegram header")),
            }
        }
        let len = if first == 0x80 {
            telegram[3] as usize
        } else {
            (first & 0x3F) as usize
        };
        for _ in 0..len + 1 {
            match self.line.next_byte(&mut self.channel, deadline)? {
                Some(b) => telegram.push(b),
                None => return Err(DiagError::Timeout("BMW-FAST telegram body")),
            }
        }
        debug!("D-CAN telegram received: {telegram:02X?}");
        let (target, source, payload) = decode_telegram(&telegram)?;
        // Addresses come back swapped on the receive side
        if target != self.source && source != self.target {
            debug!("D-CAN unexpected address pair 0x{target:02X}/0x{source:02X}");
        }
        Ok(Some(payload))
    }
}

impl<C: ByteChannel> PayloadTransport for DcanSerialTransport<C> {
    fn open(&mut self) -> DiagServerResult<()> {
        self.channel.open()?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> DiagServerResult<()> {
        if self.open {
            self.channel.close()?;
            self.open = false;
            self.line.clear();
        }
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> DiagServerResult<()> {
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        let telegram = encode_telegram(self.target, self.source, payload)?;
        debug!("D-CAN telegram sent: {telegram:02X?}");
        self.channel.send(&telegram)?;
        self.line
            .discard_echo(&mut self.channel, &telegram, ECHO_WINDOW)
    }

    fn wait_frame(&mut self, _timeout: Duration) -> DiagServerResult<Option<Vec<u8>>> {
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        self.read_telegram()
    }

    fn set_baudrate(&mut self, baud: u32) -> DiagServerResult<()> {
        self.channel.set_baudrate(baud)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_format_round_trip() {
        let payload = [0x1A, 0x80];
        let t = encode_telegram(TARGET_ADDR, SRC_ADDR, &payload).unwrap();
        assert_eq!(t[0], 0x80 | 2);
        assert_eq!(t[1], TARGET_ADDR);
        assert_eq!(t[2], SRC_ADDR);
        let (target, source, data) = decode_telegram(&t).unwrap();
        assert_eq!((target, source), (TARGET_ADDR, SRC_ADDR));
        assert_eq!(data, payload);
    }

    #[test]
    fn long_format_round_trip() {
        let payload = vec![0x55u8; 0x40];
        let t = encode_telegram(TARGET_ADDR, SRC_ADDR, &payload).unwrap();
        assert_eq!(t[0], 0x80);
        assert_eq!(t[3] as usize, payload.len());
        let (_, _, data) = decode_telegram(&t).unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn format_boundary() {
        // 0x3F byte payload still uses the short format
        let t = encode_telegram(TARGET_ADDR, SRC_ADDR, &[0u8; 0x3F]).unwrap();
        assert_eq!(t[0], 0x80 | 0x3F);
        // one more byte switches to long
        let t = encode_telegram(TARGET_ADDR, SRC_ADDR, &[0u8; 0x40]).unwrap();
        assert_eq!(t[0], 0x80);
    }

    #[test]
    fn checksum_validation() {
        let mut t = encode_telegram(TARGET_ADDR, SRC_ADDR, &[0x10, 0x89]).unwrap();
        let last = t.len() - 1;
        t[last] = t[last].wrapping_add(1);
        assert!(matches!(
            decode_telegram(&t),
            Err(DiagError::BadChecksum { .. })
        ));
    }
}
