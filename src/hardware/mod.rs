//! The hardware module contains concrete channel implementations:
//! a [serialport](https://crates.io/crates/serialport) backed byte channel
//! for real serial adapters (behind the `serial` feature), and scripted
//! simulation channels for testing without hardware

#[cfg(feature = "serial")]
pub mod serial_port;
pub mod simulation;
