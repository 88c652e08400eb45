use std::time::Duration;

use legacy_diagnostics::channel::PayloadTransport;
use legacy_diagnostics::hardware::simulation::SimulationCanChannel;
use legacy_diagnostics::tp20::{Tp20Settings, Tp20Transport};
use legacy_diagnostics::DiagError;

const SETUP_REQUEST: [u8; 7] = [0x01, 0xC0, 0x00, 0x10, 0x00, 0x03, 0x01];
const SETUP_ACCEPT: [u8; 7] = [0x00, 0xD0, 0x00, 0x03, 0x40, 0x07, 0x01];
const PARAMS_REQUEST: [u8; 6] = [0xA0, 0x0F, 0x8A, 0xFF, 0x32, 0xFF];
const PARAMS_RESPONSE: [u8; 6] = [0xA1, 0x0F, 0x8A, 0xFF, 0x32, 0xFF];

fn settings() -> Tp20Settings {
    Tp20Settings {
        timeout: Duration::from_millis(500),
        keepalive_interval: None,
        ..Tp20Settings::default()
    }
}

/// Scripts the full channel establishment handshake on the mock bus
fn script_handshake(chan: &SimulationCanChannel) {
    chan.add_response(0x200, &SETUP_REQUEST, &[(0x201, &SETUP_ACCEPT)]);
    chan.add_response(0x740, &PARAMS_REQUEST, &[(0x300, &PARAMS_RESPONSE)]);
}

#[test]
fn channel_setup_and_single_frame_send() {
    env_logger::try_init().ok();
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);
    // Single data frame carrying "10 89" behind the length header, ACKed by
    // the ECU with the next expected sequence number
    chan.add_response(
        0x740,
        &[0x20, 0x00, 0x02, 0x10, 0x89, 0x00, 0x00, 0x00],
        &[(0x300, &[0xB1])],
    );

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");
    transport.send(&[0x10, 0x89]).expect("send failed");

    let sent = chan.sent();
    assert_eq!(sent[0].id(), 0x200);
    assert_eq!(sent[0].data(), &SETUP_REQUEST);
    assert_eq!(sent[1].id(), 0x740);
    assert_eq!(sent[1].data(), &PARAMS_REQUEST);
    assert_eq!(sent[2].id(), 0x740);
    assert_eq!(sent[2].data(), &[0x20, 0x00, 0x02, 0x10, 0x89, 0x00, 0x00, 0x00]);
}

#[test]
fn request_response_round_trip() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);
    chan.add_response(
        0x740,
        &[0x20, 0x00, 0x02, 0x10, 0x89, 0x00, 0x00, 0x00],
        &[(0x300, &[0xB1])],
    );

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");
    transport.send(&[0x10, 0x89]).expect("send failed");

    // ECU answers with its own last-frame-with-ACK, sequence 0
    chan.queue_frame(0x300, &[0x20, 0x00, 0x02, 0x50, 0x89, 0x00, 0x00, 0x00]);
    let resp = transport
        .wait_frame(Duration::from_millis(500))
        .expect("recv failed")
        .expect("no payload");
    assert_eq!(resp, vec![0x50, 0x89]);

    // We acknowledged the ECU's frame with its next sequence number
    let acks = chan
        .sent()
        .iter()
        .filter(|f| f.id() == 0x740 && f.data() == [0xB1])
        .count();
    assert_eq!(acks, 1);
}

#[test]
fn keepalive_frames_are_consumed_silently() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");

    // Peer keep-alive ahead of the actual data
    chan.queue_frame(0x300, &[0xA3]);
    chan.queue_frame(0x300, &[0xA3]);
    chan.queue_frame(0x300, &[0x40, 0x00, 0x01, 0x7E, 0x00, 0x00, 0x00, 0x00]);

    let resp = transport
        .wait_frame(Duration::from_millis(500))
        .expect("recv failed")
        .expect("no payload");
    assert_eq!(resp, vec![0x7E]);
}

#[test]
fn sequence_counter_wraps_across_blocks() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");

    // 120 byte payload plus the 2 byte length header = 122 bytes = 18 chunks.
    // With block size 15, an ACK is due after chunk 15 (seq 14) and after the
    // final chunk (seq 1 second time around)
    chan.queue_frame(0x300, &[0xBF]);
    chan.queue_frame(0x300, &[0xB2]);

    let payload: Vec<u8> = (0..120).map(|i| i as u8).collect();
    transport.send(&payload).expect("segmented send failed");

    let frames: Vec<_> = chan
        .sent()
        .into_iter()
        .filter(|f| {
            f.id() == 0x740 && matches!(f.data()[0] & 0xF0, 0x10 | 0x20 | 0x30 | 0x40)
        })
        .collect();
    assert_eq!(frames.len(), 18);

    // The 17th frame repeats the sequence number of the 1st (wrap at 16)
    assert_eq!(frames[0].data()[0] & 0x0F, frames[16].data()[0] & 0x0F);
    // Sequence numbers simply count modulo 16 from 0
    for (i, f) in frames.iter().enumerate() {
        assert_eq!(f.data()[0] & 0x0F, (i % 16) as u8, "frame {i}");
    }
    // Chunk 15 closes the first ACK window and still announces more data
    assert_eq!(frames[14].data()[0], 0x1E);
    // The final chunk is last-with-ACK
    assert_eq!(frames[17].data()[0], 0x21);
    // Everything in between is no-ACK more-follows
    for f in &frames[..14] {
        assert_eq!(f.data()[0] & 0xF0, 0x30, "{:02X?}", f.data());
    }
}

#[test]
fn setup_rejection_is_fatal() {
    let chan = SimulationCanChannel::new();
    chan.add_response(
        0x200,
        &SETUP_REQUEST,
        &[(0x201, &[0x00, 0xD6, 0x00, 0x03, 0x40, 0x07, 0x01])],
    );

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    assert!(matches!(
        transport.open(),
        Err(DiagError::ChannelSetupRejected(0xD6))
    ));
}

#[test]
fn setup_timeout() {
    let chan = SimulationCanChannel::new();
    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    assert!(matches!(transport.open(), Err(DiagError::Timeout(_))));
}

#[test]
fn missing_ack_times_out() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");
    assert!(matches!(
        transport.send(&[0x10, 0x89]),
        Err(DiagError::AckTimeout(0))
    ));
}

#[test]
fn disconnect_frame_ends_receive() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");

    chan.queue_frame(0x300, &[0xA8]);
    assert!(matches!(
        transport.wait_frame(Duration::from_millis(500)),
        Err(DiagError::Disconnected)
    ));
    // Channel is down; further sends must fail the same way
    assert!(matches!(
        transport.send(&[0x10, 0x89]),
        Err(DiagError::Disconnected)
    ));
}

#[test]
fn close_sends_disconnect() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);
    chan.add_response(0x740, &[0xA8], &[(0x300, &[0xA8])]);

    let mut transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    transport.open().expect("channel setup failed");
    transport.close().expect("close failed");

    let sent = chan.sent();
    assert!(sent
        .iter()
        .any(|f| f.id() == 0x740 && f.data() == [0xA8]));
}

#[test]
fn kwp2000_session_and_read_over_tp20() {
    // The full stack: KWP2000 client on top of the TP 2.0 engine. Session
    // change (10 89) followed by a local identifier read (21 01)
    use legacy_diagnostics::kwp2000::{session::DiagnosticMode, Kwp2000Client};

    let chan = SimulationCanChannel::new();
    script_handshake(&chan);
    chan.add_response(
        0x740,
        &[0x20, 0x00, 0x02, 0x10, 0x89, 0x00, 0x00, 0x00],
        &[
            (0x300, &[0xB1]),
            (0x300, &[0x20, 0x00, 0x02, 0x50, 0x89, 0x00, 0x00, 0x00]),
        ],
    );
    chan.add_response(
        0x740,
        &[0x21, 0x00, 0x02, 0x21, 0x01, 0x00, 0x00, 0x00],
        &[
            (0x300, &[0xB2]),
            (0x300, &[0x21, 0x00, 0x05, 0x61, 0x01, 0xAA, 0xBB, 0xCC]),
        ],
    );

    let transport = Tp20Transport::new(Box::new(chan.clone()), settings());
    let mut client = Kwp2000Client::new(transport);
    client.set_timeout(Duration::from_millis(500));
    client.open().expect("open failed");

    let session = client
        .start_diagnostic_session(DiagnosticMode::Custom(0x89), None)
        .expect("session change failed");
    assert_eq!(session.diagnostic_mode, 0x89);

    let read = client
        .read_data_by_local_identifier(0x01)
        .expect("read failed");
    assert_eq!(read.local_identifier, 0x01);
    assert_eq!(read.data, vec![0xAA, 0xBB, 0xCC]);

    // Both ECU data frames were acknowledged with their next sequence numbers
    let acks: Vec<u8> = chan
        .sent()
        .iter()
        .filter(|f| f.id() == 0x740 && f.data().len() == 1 && f.data()[0] & 0xF0 == 0xB0)
        .map(|f| f.data()[0])
        .collect();
    assert_eq!(acks, vec![0xB1, 0xB2]);
}

#[test]
fn keepalive_worker_emits_channel_test() {
    let chan = SimulationCanChannel::new();
    script_handshake(&chan);

    let mut s = settings();
    s.keepalive_interval = Some(Duration::from_millis(5));
    let mut transport = Tp20Transport::new(Box::new(chan.clone()), s);
    transport.open().expect("channel setup failed");

    std::thread::sleep(Duration::from_millis(100));
    let keepalives = chan
        .sent()
        .iter()
        .filter(|f| f.id() == 0x740 && f.data() == [0xA3])
        .count();
    assert!(keepalives >= 2, "only {keepalives} keep-alive frames seen");
}
