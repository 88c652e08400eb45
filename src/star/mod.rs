//! Module for KWP2000-STAR, BMW's framing overlay for KWP2000
//!
//! Three link variants share the KWP2000 service catalog:
//! * [serial] - STAR telegrams (0xB8 start byte) straight over a serial line
//! * [dcan] - BMW-FAST telegrams over a serial CAN adapter
//! * [can] - ISO15765-2 style segmentation over CAN with a one byte address
//!   prefix
//!
//! All three implement [PayloadTransport](crate::channel::PayloadTransport)
//! and own the timing policy of the link: the receive window is derived from
//! the active `p2max` timing parameter, not from the caller's timeout.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::{channel::ByteChannel, DiagServerResult};

pub mod can;
pub mod dcan;
pub mod serial;

/// Default tester address (source) in STAR frames
pub const SRC_ADDR: u8 = 0xF1;
/// Default ECU address (target) in STAR frames
pub const TARGET_ADDR: u8 = 0x12;

/// Byte accumulator over a [ByteChannel], shared by the serial STAR and DCAN
/// transports. Keeps surplus bytes the channel delivered for the next read
/// and knows how to swallow the line echo of half duplex adapters
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: VecDeque<u8>,
}

impl LineBuffer {
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Pops one buffered byte, or pulls more from the channel. Returns None
    /// once the deadline passes with nothing buffered
    pub fn next_byte<C: ByteChannel>(
        &mut self,
        channel: &mut C,
        deadline: Instant,
    ) -> DiagServerResult<Option<u8>> {
        loop {
            if let Some(b) = self.pending.pop_front() {
                return Ok(Some(b));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if let Some(chunk) = channel.wait_frame(deadline - now)? {
                self.pending.extend(chunk);
            }
        }
    }

    /// Consumes the line echo of `sent`. The buffered bytes are only dropped
    /// once the complete transmitted byte string has been seen; anything
    /// diverging from it (real traffic on a non-echoing adapter) is left
    /// untouched. Absence of an echo within the window is not an error
    pub fn discard_echo<C: ByteChannel>(
        &mut self,
        channel: &mut C,
        sent: &[u8],
        window: Duration,
    ) -> DiagServerResult<()> {
        let deadline = Instant::now() + window;
        let mut matched = 0;
        while matched < sent.len() {
            match self.pending.get(matched) {
                Some(b) if *b == sent[matched] => {
                    matched += 1;
                    continue;
                }
                Some(_) => return Ok(()), // not an echo
                None => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(()); // echo never completed, keep what we have
            }
            match channel.wait_frame(deadline - now)? {
                Some(chunk) => self.pending.extend(chunk),
                None => {}
            }
        }
        self.pending.drain(..sent.len());
        Ok(())
    }
}
