use std::time::Duration;

use legacy_diagnostics::hardware::simulation::{
    SimulationByteChannel, SimulationPayloadTransport,
};
use legacy_diagnostics::kwp2000::{
    communication::ResponseRequired, session::DiagnosticMode, Kwp2000Client,
};
use legacy_diagnostics::star::serial::{build_frame, StarSerialTransport};
use legacy_diagnostics::DiagError;

fn client(transport: &SimulationPayloadTransport) -> Kwp2000Client<SimulationPayloadTransport> {
    let mut c = Kwp2000Client::new(transport.clone());
    c.set_timeout(Duration::from_millis(200));
    c.open().expect("open failed");
    c
}

#[test]
fn start_diagnostic_session() {
    env_logger::try_init().ok();
    let transport = SimulationPayloadTransport::new();
    transport.add_response(&[0x10, 0x89], &[&[0x50, 0x89]]);

    let mut client = client(&transport);
    let resp = client
        .start_diagnostic_session(DiagnosticMode::Custom(0x89), None)
        .expect("session change failed");
    assert_eq!(resp.diagnostic_mode, 0x89);
    assert_eq!(resp.baudrate_identifier, None);
    assert_eq!(transport.sent(), vec![vec![0x10, 0x89]]);
}

#[test]
fn pending_frames_are_absorbed() {
    // Two responsePending frames ahead of the real answer; the client keeps
    // waiting and surfaces only the positive response
    let transport = SimulationPayloadTransport::new();
    transport.add_response(
        &[0x21, 0x01],
        &[
            &[0x7F, 0x21, 0x78],
            &[0x7F, 0x21, 0x78],
            &[0x61, 0x01, 0xAA, 0xBB, 0xCC],
        ],
    );

    let mut client = client(&transport);
    let resp = client
        .read_data_by_local_identifier(0x01)
        .expect("read failed");
    assert_eq!(resp.local_identifier, 0x01);
    assert_eq!(resp.data, vec![0xAA, 0xBB, 0xCC]);
}

#[test]
fn negative_response_surfaces_with_definition() {
    let transport = SimulationPayloadTransport::new();
    transport.add_response(&[0x27, 0x01], &[&[0x7F, 0x27, 0x33]]);

    let mut client = client(&transport);
    match client.request_seed(0x01) {
        Err(DiagError::NegativeResponse { sid, code, def }) => {
            assert_eq!(sid, 0x27);
            assert_eq!(code, 0x33);
            assert_eq!(def.as_deref(), Some("securityAccessDenied"));
        }
        other => panic!("expected negative response, got {other:?}"),
    }
}

#[test]
fn pending_alone_times_out() {
    let transport = SimulationPayloadTransport::new();
    transport.add_response(&[0x3E, 0x01], &[&[0x7F, 0x3E, 0x78]]);

    let mut client = client(&transport);
    assert!(matches!(
        client.tester_present(ResponseRequired::Yes),
        Err(DiagError::Timeout(_))
    ));
}

#[test]
fn tester_present_without_response_does_not_block() {
    let transport = SimulationPayloadTransport::new();
    let mut client = client(&transport);

    client
        .tester_present(ResponseRequired::No)
        .expect("fire and forget send failed");
    assert_eq!(transport.sent(), vec![vec![0x3E, 0x02]]);
}

#[test]
fn mismatched_positive_sid_is_rejected() {
    let transport = SimulationPayloadTransport::new();
    // EcuReset answered with a StartDiagnosticSession positive id
    transport.add_response(&[0x11, 0x01], &[&[0x50, 0x01]]);

    let mut client = client(&transport);
    assert!(matches!(
        client.ecu_reset(0x01),
        Err(DiagError::WrongMessage)
    ));
}

#[test]
fn mismatched_echo_is_rejected() {
    let transport = SimulationPayloadTransport::new();
    transport.add_response(&[0x10, 0x81], &[&[0x50, 0x85]]);

    let mut client = client(&transport);
    assert!(matches!(
        client.start_diagnostic_session(DiagnosticMode::Obd2, None),
        Err(DiagError::MismatchedEcho(_))
    ));
}

#[test]
fn exception_service_ids() {
    // TesterPresent (0x3E -> 0x7E) and AccessTimingParameter (0x83 -> 0xC3)
    // use the published non-standard positive response ids
    let transport = SimulationPayloadTransport::new();
    transport.add_response(&[0x3E, 0x01], &[&[0x7E]]);
    transport.add_response(
        &[0x83, 0x03, 0x32, 0x02, 0x6E, 0x14, 0x0A],
        &[&[0xC3, 0x03, 0x32, 0x02, 0x6E, 0x14, 0x0A]],
    );

    let mut client = client(&transport);
    client
        .tester_present(ResponseRequired::Yes)
        .expect("tester present failed");
    let timing = client
        .access_timing_parameter(legacy_diagnostics::kwp2000::timing::TimingParameters::MINIMAL)
        .expect("timing access failed");
    assert_eq!(timing.timing_parameter_id, 0x03);
    assert_eq!(
        timing.parameters,
        legacy_diagnostics::kwp2000::timing::TimingParameters::MINIMAL
    );
}

#[test]
fn session_over_star_serial_link() {
    // The same session request, this time through the STAR serial framing
    env_logger::try_init().ok();
    let chan = SimulationByteChannel::new();
    let request_frame = build_frame(0x12, 0xF1, &[0x10, 0x89]).unwrap();
    let reply_frame = build_frame(0xF1, 0x12, &[0x50, 0x89]).unwrap();
    // The adapter echoes our transmission, then the ECU answers
    chan.add_response(&request_frame, &[&request_frame, &reply_frame]);

    let transport = StarSerialTransport::new(chan.clone());
    let mut client = Kwp2000Client::new(transport);
    client.set_timeout(Duration::from_millis(500));
    client.open().expect("open failed");

    let resp = client
        .start_diagnostic_session(DiagnosticMode::Custom(0x89), None)
        .expect("session change failed");
    assert_eq!(resp.diagnostic_mode, 0x89);
    assert_eq!(chan.sent(), vec![request_frame]);
}

#[test]
fn baudrate_identification_finds_answering_rate() {
    let chan = SimulationByteChannel::new();
    let probe = build_frame(0x12, 0xF1, &[0x3E, 0x01]).unwrap();
    let reply = build_frame(0xF1, 0x12, &[0x7E]).unwrap();
    chan.add_response(&probe, &[&reply]);

    let mut transport = StarSerialTransport::with_default_baudrate(chan.clone(), 9600);
    legacy_diagnostics::channel::PayloadTransport::open(&mut transport).unwrap();

    let found = transport.identify_baudrate().expect("scan failed");
    // The first probed rate answers in this script
    assert_eq!(found, Some(10400));
    assert_eq!(chan.baud_changes(), vec![10400]);
}

#[test]
fn baudrate_identification_restores_default_when_silent() {
    let chan = SimulationByteChannel::new();
    let mut transport = StarSerialTransport::with_default_baudrate(chan.clone(), 9600);
    legacy_diagnostics::channel::PayloadTransport::open(&mut transport).unwrap();

    let found = transport.identify_baudrate().expect("scan failed");
    assert_eq!(found, None);
    let changes = chan.baud_changes();
    // All eight rates probed, then the default restored
    assert_eq!(changes.len(), 9);
    assert_eq!(changes.last(), Some(&9600));
}
