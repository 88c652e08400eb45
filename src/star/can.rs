//! KWP2000-STAR over CAN with ISO15765-2 style segmentation
//!
//! Every CAN frame leads with a one byte address (the ECU address on
//! transmit, the tester address on receive) followed by a standard ISO-TP
//! PCI byte. Frames are padded to 8 data bytes. The consecutive frame
//! sequence counter starts at 1 and wraps 0x0F back to 1, never touching 0.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{
    channel::{CanChannel, ChannelError, PayloadTransport},
    kwp2000::timing::TimingParameters,
    DiagError, DiagServerResult,
};

use super::{SRC_ADDR, TARGET_ADDR};

/// PCI high nibble: single frame
const PCI_SINGLE: u8 = 0x00;
/// PCI high nibble: first frame of a multi frame message
const PCI_FIRST: u8 = 0x10;
/// PCI high nibble: consecutive frame
const PCI_CONSECUTIVE: u8 = 0x20;
/// PCI high nibble: flow control
const PCI_FLOW_CONTROL: u8 = 0x30;

/// Maximum user bytes in a single frame (8 - address - PCI)
const SINGLE_FRAME_MAX: usize = 6;
/// User bytes carried by a first frame (8 - address - PCI - length low byte)
const FIRST_FRAME_DATA: usize = 5;
/// User bytes carried by a consecutive frame
const CONSECUTIVE_FRAME_DATA: usize = 6;

fn next_seq(seq: u8) -> u8 {
    match (seq + 1) & 0x0F {
        0 => 1,
        s => s,
    }
}

/// Configuration of the STAR-on-CAN transport
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StarCanSettings {
    /// CAN id the tester transmits requests on
    pub tx_id: u32,
    /// CAN id the ECU responds on
    pub rx_id: u32,
    /// Address prefix byte on transmitted frames (the ECU address)
    pub target: u8,
    /// Address prefix byte expected on received frames (the tester address)
    pub source: u8,
    /// Separation time between consecutive frames sent by the tester
    pub separation_time: Duration,
}

impl Default for StarCanSettings {
    fn default() -> Self {
        Self {
            tx_id: 0x6F1,
            rx_id: 0x612,
            target: TARGET_ADDR,
            source: SRC_ADDR,
            separation_time: Duration::from_millis(2),
        }
    }
}

/// STAR-on-CAN transport for [Kwp2000Client](crate::kwp2000::Kwp2000Client)
#[derive(Debug)]
pub struct StarCanTransport<C: CanChannel> {
    channel: C,
    settings: StarCanSettings,
    access_timings: TimingParameters,
    open: bool,
}

impl<C: CanChannel> StarCanTransport<C> {
    /// Creates a transport over the given CAN channel
    pub fn new(channel: C, settings: StarCanSettings) -> Self {
        Self {
            channel,
            settings,
            access_timings: TimingParameters::STANDARD,
            open: false,
        }
    }

    /// Swaps the timing parameter set the receive window is derived from
    pub fn set_access_timings(&mut self, timings: TimingParameters) {
        self.access_timings = timings;
    }

    fn send_padded(&mut self, mut frame: Vec<u8>) -> DiagServerResult<()> {
        frame.resize(8, 0x00);
        debug!("STAR-CAN TX {:03X}: {frame:02X?}", self.settings.tx_id);
        self.channel
            .send_can_frame(self.settings.tx_id, &frame)
            .map_err(DiagError::from)
    }

    /// Sends a flow control granting the full message (no block limit) with
    /// a ~2 ms separation time
    fn send_flow_control(&mut self) -> DiagServerResult<()> {
        self.send_padded(vec![
            self.settings.target,
            PCI_FLOW_CONTROL,
            0x00,
            self.settings.separation_time.as_millis().max(1) as u8,
        ])
    }

    /// Waits for the ECU's flow control after a first frame
    fn await_flow_control(&mut self) -> DiagServerResult<()> {
        let deadline = Instant::now() + self.access_timings.p2max();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DiagError::Timeout("ISO-TP flow control"));
            }
            let Some(f) = self.channel.recv_can_frame(deadline - now)? else {
                continue;
            };
            if f.id() != self.settings.rx_id {
                continue;
            }
            let data = f.data();
            if data.len() < 2 || data[0] != self.settings.source {
                continue;
            }
            if data[1] & 0xF0 == PCI_FLOW_CONTROL {
                debug!("STAR-CAN flow control from ECU: {data:02X?}");
                return Ok(());
            }
        }
    }
}

impl<C: CanChannel> PayloadTransport for StarCanTransport<C> {
    fn open(&mut self) -> DiagServerResult<()> {
        self.channel.open()?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> DiagServerResult<()> {
        if self.open {
            self.channel.close()?;
            self.open = false;
        }
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> DiagServerResult<()> {
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        if payload.len() > 0xFFF {
            return Err(DiagError::ParameterInvalid);
        }

        if payload.len() <= SINGLE_FRAME_MAX {
            let mut frame = vec![self.settings.target, PCI_SINGLE | payload.len() as u8];
            frame.extend_from_slice(payload);
            return self.send_padded(frame);
        }

        // First frame carries the 12-bit total length and the first 5 bytes
        let mut first = vec![
            self.settings.target,
            PCI_FIRST | ((payload.len() >> 8) & 0x0F) as u8,
            payload.len() as u8,
        ];
        first.extend_from_slice(&payload[..FIRST_FRAME_DATA]);
        self.send_padded(first)?;

        self.await_flow_control()?;

        let mut seq = 1u8;
        let mut offset = FIRST_FRAME_DATA;
        while offset < payload.len() {
            let end = (offset + CONSECUTIVE_FRAME_DATA).min(payload.len());
            let mut frame = vec![self.settings.target, PCI_CONSECUTIVE | seq];
            frame.extend_from_slice(&payload[offset..end]);
            self.send_padded(frame)?;
            offset = end;
            seq = next_seq(seq);
            if offset < payload.len() {
                std::thread::sleep(self.settings.separation_time);
            }
        }
        Ok(())
    }

    fn wait_frame(&mut self, _timeout: Duration) -> DiagServerResult<Option<Vec<u8>>> {
        if !self.open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        let window = self.access_timings.p2max();
        let mut buffer: Vec<u8> = Vec::new();
        let mut total_len: Option<usize> = None;
        let mut expected_seq = 1u8;
        let mut last_activity = Instant::now();

        loop {
            let elapsed = last_activity.elapsed();
            if elapsed >= window {
                return if buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(DiagError::Timeout("ISO-TP consecutive frame"))
                };
            }
            let Some(f) = self.channel.recv_can_frame(window - elapsed)? else {
                continue;
            };
            if f.id() != self.settings.rx_id {
                debug!("STAR-CAN ignoring frame with id 0x{:03X}", f.id());
                continue;
            }
            let data = f.data();
            if data.len() < 2 {
                continue;
            }
            if data[0] != self.settings.source {
                debug!("STAR-CAN ignoring frame with src 0x{:02X}", data[0]);
                continue;
            }
            let pci = data[1];
            match pci & 0xF0 {
                PCI_SINGLE => {
                    let len = (pci & 0x0F) as usize;
                    if len > data.len() - 2 {
                        warn!("STAR-CAN single frame length {len} exceeds frame");
                        continue;
                    }
                    debug!("STAR-CAN RX SF: {:02X?}", &data[2..2 + len]);
                    return Ok(Some(data[2..2 + len].to_vec()));
                }
                PCI_FIRST => {
                    if data.len() < 3 {
                        continue;
                    }
                    let len = (((pci & 0x0F) as usize) << 8) | data[2] as usize;
                    total_len = Some(len);
                    buffer.clear();
                    buffer.extend_from_slice(&data[3..]);
                    expected_seq = 1;
                    debug!("STAR-CAN RX FF, total {len} bytes");
                    self.send_flow_control()?;
                    last_activity = Instant::now();
                    if buffer.len() >= len {
                        buffer.truncate(len);
                        return Ok(Some(buffer));
                    }
                }
                PCI_CONSECUTIVE => {
                    let seq = pci & 0x0F;
                    if seq != expected_seq {
                        return Err(DiagError::SequenceError {
                            expected: expected_seq,
                            got: seq,
                        });
                    }
                    buffer.extend_from_slice(&data[2..]);
                    expected_seq = next_seq(expected_seq);
                    last_activity = Instant::now();
                    if let Some(len) = total_len {
                        if buffer.len() >= len {
                            buffer.truncate(len);
                            debug!("STAR-CAN RX complete: {buffer:02X?}");
                            return Ok(Some(buffer));
                        }
                    }
                }
                PCI_FLOW_CONTROL => {
                    // ECU flow control while we are receiving; nothing to do
                    last_activity = Instant::now();
                }
                other => {
                    warn!("STAR-CAN unknown PCI type 0x{other:02X}");
                    last_activity = Instant::now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps_past_fifteen_skipping_zero() {
        let mut seq = 1u8;
        let mut seen = Vec::new();
        for _ in 0..30 {
            seen.push(seq);
            seq = next_seq(seq);
        }
        assert!(!seen.contains(&0));
        assert_eq!(seen[14], 0x0F);
        assert_eq!(seen[15], 0x01);
    }
}
