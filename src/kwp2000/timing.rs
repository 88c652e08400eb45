//! Session timing parameters (P2/P3/P4) and the `AccessTimingParameter`
//! service (0x83)
//!
//! The five parameter bytes are carried encoded on the wire with per-field
//! resolutions: `p2min`, `p3min` and `p4min` count in 0.5 ms steps, `p2max`
//! in 25 ms steps and `p3max` in 250 ms steps.

use std::time::Duration;

use crate::{channel::PayloadTransport, DiagError, DiagServerResult};

use super::{Kwp2000Client, KwpCommand};

/// Timing parameter identifier for "set parameters"
pub const TPI_SET_PARAMETERS: u8 = 0x03;

/// The five encoded timing parameter bytes of a KWP2000 session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimingParameters {
    /// Minimum time between request and response (0.5 ms units)
    pub p2min: u8,
    /// Maximum time between request and response (25 ms units)
    pub p2max: u8,
    /// Minimum time between end of response and a new request (0.5 ms units)
    pub p3min: u8,
    /// Maximum time between end of response and a new request (250 ms units)
    pub p3max: u8,
    /// Minimum inter-byte time of the request telegram (0.5 ms units)
    pub p4min: u8,
}

impl TimingParameters {
    /// Standard timing parameter preset, as captured from tester traffic.
    ///
    /// Note: two presets circulate in BMW tooling for the same link speed;
    /// both are exposed here rather than guessing which is canonical. See
    /// also [Self::MINIMAL]
    pub const STANDARD: Self = Self {
        p2min: 0x32,
        p2max: 0x02,
        p3min: 0x6E,
        p3max: 0x01,
        p4min: 0x00,
    };

    /// Minimal (fast communication) timing parameter preset
    pub const MINIMAL: Self = Self {
        p2min: 0x32,
        p2max: 0x02,
        p3min: 0x6E,
        p3max: 0x14,
        p4min: 0x0A,
    };

    /// Returns the encoded wire representation
    pub fn to_bytes(&self) -> [u8; 5] {
        [self.p2min, self.p2max, self.p3min, self.p3max, self.p4min]
    }

    /// Builds the record from its encoded wire representation
    pub fn from_bytes(b: [u8; 5]) -> Self {
        Self {
            p2min: b[0],
            p2max: b[1],
            p3min: b[2],
            p3max: b[3],
            p4min: b[4],
        }
    }

    /// P2min as a duration (0.5 ms resolution, 0 - 127.5 ms)
    pub fn p2min(&self) -> Duration {
        Duration::from_micros(self.p2min as u64 * 500)
    }

    /// P2max as a duration (25 ms resolution, 0 - 6375 ms)
    pub fn p2max(&self) -> Duration {
        Duration::from_millis(self.p2max as u64 * 25)
    }

    /// P3min as a duration (0.5 ms resolution, 0 - 127.5 ms)
    pub fn p3min(&self) -> Duration {
        Duration::from_micros(self.p3min as u64 * 500)
    }

    /// P3max as a duration (250 ms resolution, 0 - 63750 ms)
    pub fn p3max(&self) -> Duration {
        Duration::from_millis(self.p3max as u64 * 250)
    }

    /// P4min as a duration (0.5 ms resolution, 0 - 127.5 ms)
    pub fn p4min(&self) -> Duration {
        Duration::from_micros(self.p4min as u64 * 500)
    }

    /// Encodes durations back into a parameter record. Values are rounded
    /// down to the field resolution and saturate at the byte range
    pub fn from_durations(
        p2min: Duration,
        p2max: Duration,
        p3min: Duration,
        p3max: Duration,
        p4min: Duration,
    ) -> Self {
        Self {
            p2min: (p2min.as_micros() / 500).min(0xFF) as u8,
            p2max: (p2max.as_millis() / 25).min(0xFF) as u8,
            p3min: (p3min.as_micros() / 500).min(0xFF) as u8,
            p3max: (p3max.as_millis() / 250).min(0xFF) as u8,
            p4min: (p4min.as_micros() / 500).min(0xFF) as u8,
        }
    }
}

/// Parsed response of [Kwp2000Client::access_timing_parameter]
#[derive(Debug, Clone, Copy)]
pub struct AccessTimingResponse {
    /// Echo of the timing parameter identifier
    pub timing_parameter_id: u8,
    /// Timing parameters now in effect, as reported by the ECU
    pub parameters: TimingParameters,
}

impl<T: PayloadTransport> Kwp2000Client<T> {
    /// Writes session timing parameters to the ECU (`AccessTimingParameter`,
    /// TPI 0x03) and returns the values the ECU reports back in effect
    pub fn access_timing_parameter(
        &mut self,
        parameters: TimingParameters,
    ) -> DiagServerResult<AccessTimingResponse> {
        self.access_timing_parameter_with_id(TPI_SET_PARAMETERS, parameters)
    }

    /// Same as [Self::access_timing_parameter] with an explicit timing
    /// parameter identifier byte
    pub fn access_timing_parameter_with_id(
        &mut self,
        timing_parameter_id: u8,
        parameters: TimingParameters,
    ) -> DiagServerResult<AccessTimingResponse> {
        let enc = parameters.to_bytes();
        let args = [
            timing_parameter_id,
            enc[0],
            enc[1],
            enc[2],
            enc[3],
            enc[4],
        ];
        let resp = self.send_request(KwpCommand::AccessTimingParameter, &args)?;
        if resp.len() < 6 {
            return Err(DiagError::InvalidResponseLength);
        }
        if resp[0] != timing_parameter_id {
            return Err(DiagError::MismatchedEcho("timing parameter identifier"));
        }
        Ok(AccessTimingResponse {
            timing_parameter_id: resp[0],
            parameters: TimingParameters::from_bytes([
                resp[1], resp[2], resp[3], resp[4], resp[5],
            ]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_bytes() {
        assert_eq!(TimingParameters::STANDARD.to_bytes(), [0x32, 0x02, 0x6E, 0x01, 0x00]);
        assert_eq!(TimingParameters::MINIMAL.to_bytes(), [0x32, 0x02, 0x6E, 0x14, 0x0A]);
    }

    #[test]
    fn decoded_durations() {
        let t = TimingParameters::MINIMAL;
        assert_eq!(t.p2min(), Duration::from_millis(25));
        assert_eq!(t.p2max(), Duration::from_millis(50));
        assert_eq!(t.p3min(), Duration::from_millis(55));
        assert_eq!(t.p3max(), Duration::from_millis(5000));
        assert_eq!(t.p4min(), Duration::from_millis(5));
    }

    #[test]
    fn encode_decode_round_trip() {
        // Every 5 byte record survives decode followed by encode
        for b in [0x00u8, 0x01, 0x32, 0x6E, 0x8A, 0xFF] {
            let t = TimingParameters::from_bytes([b, b, b, b, b]);
            let rt = TimingParameters::from_durations(
                t.p2min(),
                t.p2max(),
                t.p3min(),
                t.p3max(),
                t.p4min(),
            );
            assert_eq!(t, rt);
        }
    }
}
