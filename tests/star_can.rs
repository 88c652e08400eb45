use std::time::Duration;

use legacy_diagnostics::channel::PayloadTransport;
use legacy_diagnostics::hardware::simulation::SimulationCanChannel;
use legacy_diagnostics::star::can::{StarCanSettings, StarCanTransport};
use legacy_diagnostics::DiagError;

fn transport(chan: &SimulationCanChannel) -> StarCanTransport<SimulationCanChannel> {
    let mut t = StarCanTransport::new(chan.clone(), StarCanSettings::default());
    t.open().expect("open failed");
    t
}

#[test]
fn single_frame_request() {
    env_logger::try_init().ok();
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    t.send(&[0x1A, 0x80]).expect("send failed");
    let sent = chan.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id(), 0x6F1);
    assert_eq!(sent[0].data(), &[0x12, 0x02, 0x1A, 0x80, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn multi_frame_request_with_flow_control() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    // 12 byte payload: First Frame, ECU flow control, two Consecutive Frames
    let payload: Vec<u8> = (0..12).collect();
    chan.add_response(
        0x6F1,
        &[0x12, 0x10, 0x0C, 0x00, 0x01, 0x02, 0x03, 0x04],
        &[(0x612, &[0xF1, 0x30, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00])],
    );

    t.send(&payload).expect("send failed");

    let sent = chan.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].data(), &[0x12, 0x10, 0x0C, 0x00, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(sent[1].data(), &[0x12, 0x21, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]);
    assert_eq!(sent[2].data(), &[0x12, 0x22, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn multi_frame_send_requires_flow_control() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    let payload: Vec<u8> = (0..12).collect();
    assert!(matches!(t.send(&payload), Err(DiagError::Timeout(_))));
    // Only the first frame went out
    assert_eq!(chan.sent().len(), 1);
}

#[test]
fn single_frame_response() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    chan.queue_frame(0x612, &[0xF1, 0x03, 0x5A, 0x80, 0x22, 0x00, 0x00, 0x00]);
    let resp = t
        .wait_frame(Duration::from_millis(100))
        .expect("recv failed")
        .expect("no payload");
    assert_eq!(resp, vec![0x5A, 0x80, 0x22]);
}

#[test]
fn multi_frame_response_reassembly() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    let expected: Vec<u8> = (0x40..0x4C).collect();
    chan.queue_frame(0x612, &[0xF1, 0x10, 0x0C, 0x40, 0x41, 0x42, 0x43, 0x44]);
    chan.queue_frame(0x612, &[0xF1, 0x21, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A]);
    chan.queue_frame(0x612, &[0xF1, 0x22, 0x4B, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let resp = t
        .wait_frame(Duration::from_millis(100))
        .expect("recv failed")
        .expect("no payload");
    assert_eq!(resp, expected);

    // The tester granted the transfer with a flow control frame
    let fc = chan
        .sent()
        .into_iter()
        .find(|f| f.data()[1] == 0x30)
        .expect("no flow control sent");
    assert_eq!(fc.id(), 0x6F1);
    assert_eq!(fc.data(), &[0x12, 0x30, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn out_of_order_consecutive_frame() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    chan.queue_frame(0x612, &[0xF1, 0x10, 0x0C, 0x40, 0x41, 0x42, 0x43, 0x44]);
    chan.queue_frame(0x612, &[0xF1, 0x23, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A]);

    assert!(matches!(
        t.wait_frame(Duration::from_millis(100)),
        Err(DiagError::SequenceError {
            expected: 1,
            got: 3
        })
    ));
}

#[test]
fn frames_from_other_ids_are_ignored() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);

    chan.queue_frame(0x7E8, &[0xF1, 0x03, 0x01, 0x02, 0x03, 0x00, 0x00, 0x00]);
    chan.queue_frame(0x612, &[0x55, 0x03, 0x01, 0x02, 0x03, 0x00, 0x00, 0x00]); // wrong src
    chan.queue_frame(0x612, &[0xF1, 0x02, 0x50, 0x89, 0x00, 0x00, 0x00, 0x00]);

    let resp = t
        .wait_frame(Duration::from_millis(100))
        .expect("recv failed")
        .expect("no payload");
    assert_eq!(resp, vec![0x50, 0x89]);
}

#[test]
fn read_ecu_identification_end_to_end() {
    // KWP2000 client over the STAR-on-CAN link: 1A 80 request as a single
    // frame, segmented identification response from the ECU
    use legacy_diagnostics::kwp2000::Kwp2000Client;

    let chan = SimulationCanChannel::new();
    let ident: Vec<u8> = vec![
        0x80, 0x37, 0x38, 0x39, 0x36, 0x34, 0x35, 0x30, 0x31, 0x32, 0x05, 0x16, 0x01, 0x07,
        0x22, 0x10, 0x25,
    ];
    let mut resp = vec![0x5A];
    resp.extend_from_slice(&ident);
    assert_eq!(resp.len(), 18);

    chan.add_response(
        0x6F1,
        &[0x12, 0x02, 0x1A, 0x80, 0x00, 0x00, 0x00, 0x00],
        &[
            (0x612, &[0xF1, 0x10, 0x12, resp[0], resp[1], resp[2], resp[3], resp[4]]),
            (0x612, &[0xF1, 0x21, resp[5], resp[6], resp[7], resp[8], resp[9], resp[10]]),
            (
                0x612,
                &[0xF1, 0x22, resp[11], resp[12], resp[13], resp[14], resp[15], resp[16]],
            ),
            (0x612, &[0xF1, 0x23, resp[17], 0x00, 0x00, 0x00, 0x00, 0x00]),
        ],
    );

    let transport = StarCanTransport::new(chan.clone(), StarCanSettings::default());
    let mut client = Kwp2000Client::new(transport);
    client.set_timeout(Duration::from_millis(500));
    client.open().expect("open failed");

    let data = client
        .read_ecu_identification(Some(0x80))
        .expect("identification read failed");
    assert_eq!(data, ident);

    // The tester granted the segmented response with a flow control frame
    assert!(chan
        .sent()
        .iter()
        .any(|f| f.id() == 0x6F1 && f.data()[1] == 0x30));
}

#[test]
fn nothing_received_yields_none() {
    let chan = SimulationCanChannel::new();
    let mut t = transport(&chan);
    let resp = t.wait_frame(Duration::from_millis(50)).expect("recv failed");
    assert_eq!(resp, None);
}
