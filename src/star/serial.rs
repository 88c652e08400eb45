//! KWP2000-STAR over a plain serial line
//!
//! Telegram layout: `[0xB8, target, source, len, payload..., checksum]` with
//! the checksum being the modulo 256 sum over all preceding bytes.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::{
    channel::{ByteChannel, ChannelError, PayloadTransport},
    kwp2000::timing::TimingParameters,
    DiagError, DiagServerResult,
};

use super::{LineBuffer, SRC_ADDR, TARGET_ADDR};

/// Start byte of every STAR serial telegram
pub const START_BYTE: u8 = 0xB8;

/// Window granted to the adapter's own echo after each transmission
const ECHO_WINDOW: Duration = Duration::from_millis(50);

/// Baud rates probed by [StarSerialTransport::identify_baudrate], in scan order
pub const BAUDRATE_SCAN_ORDER: [u32; 8] = [
    10400, 9600, 19200, 20800, 38400, 57600, 115200, 125000,
];

/// Modulo 256 sum checksum over a STAR message
pub fn checksum(message: &[u8]) -> u8 {
    message.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Builds a complete STAR telegram around a KWP2000 service payload
pub fn build_frame(target: u8, source: u8, payload: &[u8]) -> DiagServerResult<Vec<u8>> {
    if payload.len() > 0xFF {
        return Err(DiagError::ParameterInvalid);
    }
    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.push(START_BYTE);
    frame.push(target);
    frame.push(source);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    Ok(frame)
}

/// Parses a complete STAR telegram, returning the payload
pub fn parse_frame(frame: &[u8]) -> DiagServerResult<Vec<u8>> {
    if frame.len() < 5 {
        return Err(DiagError::InvalidFrame(format!(
            "STAR frame too short ({} bytes)",
            frame.len()
        )));
    }
    if frame[0] != START_BYTE {
        return Err(DiagError::InvalidFrame(format!(
            "bad STAR start byte 0x{:02X}",
            frame[0]
        )));
    }
    let len = frame[3] as usize;
    let total = 4 + len + 1;
    if frame.len() < total {
        return Err(DiagError::InvalidFrame(format!(
            "STAR frame truncated, need {total} bytes, got {}",
            frame.len()
        )));
    }
    let expected = checksum(&frame[..4 + len]);
    let got = frame[4 + len];
    if expected != got {
        return Err(DiagError::BadChecksum { expected, got });
    }
    Ok(frame[4..4 + len].to_vec())
}

/// STAR serial transport for [Kwp2000Client](crate::kwp2000::Kwp2000Client).
///
/// The receive window is derived from the active timing parameters
/// (`p2max`), so callers' timeouts are treated as an outer bound only. The
/// transport supports live baud rate changes and blind baud rate
/// identification; on close, the line is re-bauded back to its default
#[derive(Debug)]
pub struct StarSerialTransport<C: ByteChannel> {
    channel: C,
    target: u8,
    source: u8,
    access_timings: TimingParameters,
    default_baudrate: Option<u32>,
    open: bool,
    line: LineBuffer,
}

impl<C: ByteChannel> StarSerialTransport<C> {
    /// Creates a transport with the default tester (0xF1) and ECU (0x12)
    /// addresses
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            target: TARGET_ADDR,
            source: SRC_ADDR,
            access_timings: TimingParameters::STANDARD,
            default_baudrate: None,
            open: false,
            line: LineBuffer::default(),
        }
    }

    /// Same as [Self::new], remembering `default_baudrate` so closing the
    /// transport re-bauds the line back to it
    pub fn with_default_baudrate(channel: C, default_baudrate: u32) -> Self {
        let mut t = Self::new(channel);
        t.default_baudrate = Some(default_baudrate);
        t
    }

    /// Overrides the target/source address pair carried in every telegram
    pub fn set_addresses(&mut self, target: u8, source: u8) {
        self.target = target;
        self.source = source;
    }

    /// Swaps the timing parameter set the receive window is derived from
    pub fn set_access_timings(&mut self, timings: TimingParameters) {
        self.access_timings = timings;
        info!(
            "STAR access timings updated, p2max now {:?}",
            timings.p2max()
        );
    }

    fn receive_window(&self) -> Duration {
        self.access_timings.p2max()
    }

    /// Reads one complete telegram off the line: scan to the start byte,
    /// read the header, then the payload and checksum
    fn read_frame(&mut self) -> DiagServerResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + self.receive_window();
        // Scan for the start byte, discarding line noise
        loop {
            match self.line.next_byte(&mut self.channel, deadline)? {
                None => return Ok(None),
                Some(START_BYTE) => break,
                Some(noise) => debug!("STAR discarding noise byte 0x{noise:02X}"),
            }
        }
        let mut frame = vec![START_BYTE];
        // Target, source and length
        for _ in 0..3 {
            match self.line.next_byte(&mut self.channel, deadline)? {
                Some(b) => frame.push(b),
                None => return Err(DiagError::Timeout("STAR frame header")),
            }
        }
        let len = frame[3] as usize;
        for _ in 0..len + 1 {
            match self.line.next_byte(&mut self.channel, deadline)? {
                Some(b) => frame.push(b),
                None => return Err(DiagError::Timeout("STAR frame body")),
            }
        }
        debug!("STAR frame received: {frame:02X?}");
        parse_frame(&frame).map(Some)
    }

    /// Scans [BAUDRATE_SCAN_ORDER], probing each rate with a
    /// `TesterPresent(responseRequired=yes)` telegram, and returns the first
    /// rate at which any telegram comes back (a negative response counts).
    /// Restores the original baud rate if nothing answers
    pub fn identify_baudrate(&mut self) -> DiagServerResult<Option<u32>> {
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        for baud in BAUDRATE_SCAN_ORDER {
            info!("Probing {baud} baud");
            self.channel.set_baudrate(baud)?;
            // Let the line settle, then flush whatever noise arrived
            std::thread::sleep(Duration::from_millis(50));
            self.line.clear();
            while self.channel.wait_frame(Duration::from_millis(1))?.is_some() {}

            let probe = build_frame(self.target, self.source, &[0x3E, 0x01])?;
            if self.channel.send(&probe).is_err() {
                continue;
            }
            self.line
                .discard_echo(&mut self.channel, &probe, ECHO_WINDOW)?;
            match self.read_frame() {
                Ok(Some(_)) => {
                    info!("Response received at {baud} baud");
                    return Ok(Some(baud));
                }
                Ok(None) => continue,
                Err(_) => continue,
            }
        }
        if let Some(baud) = self.default_baudrate {
            let _ = self.channel.set_baudrate(baud);
        }
        Ok(None)
    }
}

impl<C: ByteChannel> PayloadTransport for StarSerialTransport<C> {
    fn open(&mut self) -> DiagServerResult<()> {
        self.channel.open()?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> DiagServerResult<()> {
        if self.open {
            if let Some(baud) = self.default_baudrate {
                // Leave the line the way we found it
                let _ = self.channel.set_baudrate(baud);
            }
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
        let frame = build_frame(self.target, self.source, payload)?;
        debug!("STAR frame sent: {frame:02X?}");
        self.channel.send(&frame)?;
        self.line.discard_echo(&mut self.channel, &frame, ECHO_WINDOW)
    }

    fn wait_frame(&mut self, _timeout: Duration) -> DiagServerResult<Option<Vec<u8>>> {
        // The window is owned by the timing parameters, not the caller
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        self.read_frame()
    }

    fn set_baudrate(&mut self, baud: u32) -> DiagServerResult<()> {
        self.channel.set_baudrate(baud)?;
        Ok(())
    }
}
