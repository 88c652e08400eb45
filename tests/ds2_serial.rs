use std::time::Duration;

use legacy_diagnostics::ds2::{frame, services::memory_type, Ds2Client, Ds2Status};
use legacy_diagnostics::hardware::simulation::SimulationByteChannel;
use legacy_diagnostics::DiagError;

fn client(chan: &SimulationByteChannel) -> Ds2Client<SimulationByteChannel> {
    let mut c = Ds2Client::new(chan.clone());
    c.set_timeout(Duration::from_millis(200));
    c.open().expect("open failed");
    c
}

#[test]
fn read_memory_transaction() {
    env_logger::try_init().ok();
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    // IKE style read of one byte at 0x0077B0 from the DME (0x12)
    let request = frame::build_frame(0x12, &[0x06, 0x01, 0x00, 0x77, 0xB0, 0x01]).unwrap();
    let reply = frame::build_frame(0x12, &[0xA0, 0x01, 0x00, 0x77, 0xB0, 0x01, 0x42]).unwrap();
    assert_eq!(reply[..8], [0x12, 0x0A, 0xA0, 0x01, 0x00, 0x77, 0xB0, 0x01]);

    // Line echo first, then the reply split across reads to exercise the
    // incremental parser
    chan.queue_rx(&request);
    chan.queue_rx(&reply[..1]);
    chan.queue_rx(&reply[1..4]);
    chan.queue_rx(&reply[4..]);

    let res = client
        .read_memory(0x12, memory_type::ROM, 0x0077B0, 1)
        .expect("read_memory failed");
    assert_eq!(res.memory_data, vec![0x42]);
    assert_eq!(res.memory_type_echo, 0x01);
    assert_eq!(res.address_echo, 0x0077B0);
    assert_eq!(res.size_echo, 1);

    // The request went out exactly once, correctly framed
    assert_eq!(chan.sent(), vec![request]);
}

#[test]
fn ident_returns_raw_data() {
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    let request = frame::build_frame(0x12, &[0x04, 0x00]).unwrap();
    let ident = [0x12, 0x34, 0x56, 0x78];
    let mut payload = vec![0xA0];
    payload.extend_from_slice(&ident);
    let reply = frame::build_frame(0x12, &payload).unwrap();

    chan.queue_rx(&request);
    chan.queue_rx(&reply);

    let res = client.ident(0x12).expect("ident failed");
    assert_eq!(res, ident);
}

#[test]
fn busy_status_is_recoverable() {
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    let request = frame::build_frame(0x80, &[0x04, 0x00]).unwrap();
    let reply = frame::build_frame(0x80, &[0xA1]).unwrap();
    chan.queue_rx(&request);
    chan.queue_rx(&reply);

    let err = client.ident(0x80).unwrap_err();
    assert!(matches!(err, DiagError::Ds2Status(Ds2Status::Busy)));
    assert!(err.is_recoverable());
}

#[test]
fn nack_status_is_fatal() {
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    let request = frame::build_frame(0x80, &[0x04, 0x00]).unwrap();
    let reply = frame::build_frame(0x80, &[0xFF]).unwrap();
    chan.queue_rx(&request);
    chan.queue_rx(&reply);

    let err = client.ident(0x80).unwrap_err();
    assert!(matches!(err, DiagError::Ds2Status(Ds2Status::Nack)));
    assert!(!err.is_recoverable());
}

#[test]
fn corrupted_reply_checksum() {
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    let request = frame::build_frame(0x12, &[0x04, 0x00]).unwrap();
    let mut reply = frame::build_frame(0x12, &[0xA0, 0x01]).unwrap();
    let last = reply.len() - 1;
    reply[last] ^= 0x5A;
    chan.queue_rx(&request);
    chan.queue_rx(&reply);

    assert!(matches!(
        client.ident(0x12),
        Err(DiagError::BadChecksum { .. })
    ));
}

#[test]
fn reply_timeout() {
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    let request = frame::build_frame(0x12, &[0x04, 0x00]).unwrap();
    // Echo arrives but no reply does
    chan.queue_rx(&request);

    assert!(matches!(client.ident(0x12), Err(DiagError::Timeout(_))));
}

#[test]
fn reply_from_wrong_ecu() {
    let chan = SimulationByteChannel::new();
    let mut client = client(&chan);

    let request = frame::build_frame(0x12, &[0x04, 0x00]).unwrap();
    let reply = frame::build_frame(0x80, &[0xA0, 0x01]).unwrap();
    chan.queue_rx(&request);
    chan.queue_rx(&reply);

    assert!(matches!(
        client.ident(0x12),
        Err(DiagError::InvalidFrame(_))
    ));
}
