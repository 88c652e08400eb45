//! Module for the VW Transport Protocol 2.0 (TP 2.0) channel engine
//!
//! TP 2.0 is a connection oriented transport over CAN. A channel is
//! established with a setup handshake on CAN id 0x200, timing parameters are
//! negotiated, and application payloads are then carried as streams of data
//! frames keyed by a 4 bit sequence counter with blockwise acknowledgement.
//!
//! The engine is single-producer single-consumer: a background worker owns
//! the CAN connection and all channel state, the caller talks to it through a
//! command queue, and a separate keep-alive timer emits channel test frames
//! while the channel is up. See [Tp20Transport].

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    channel::{CanChannel, CanFrame, ChannelError, PayloadTransport},
    DiagError, DiagServerResult,
};

pub mod frame;

use frame::DataOp;

/// How long the engine waits for the disconnect echo on close
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll slice used for all blocking CAN reads, so the worker stays responsive
const POLL_SLICE: Duration = Duration::from_millis(10);

/// TP 2.0 channel configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tp20Settings {
    /// Logical address of the destination module (0x01 for the engine ECU)
    pub dest: u8,
    /// CAN id the tester asks the ECU to transmit on (the tester listens here)
    pub rx_id: u16,
    /// Preferred tester transmit id. Kept for completeness; the setup request
    /// leaves this field to the ECU to assign
    pub tx_id: u16,
    /// Proposed block size (frames per ACK window), 1..=15
    pub block_size: u8,
    /// Proposed T1 (ACK timeout) byte, encoded per the TP 2.0 timing format
    pub t1: u8,
    /// Proposed T3 (inter-frame pause) byte, encoded per the TP 2.0 timing format
    pub t3: u8,
    /// Timeout for channel setup, parameter negotiation and ACK waits
    pub timeout: Duration,
    /// Interval between keep-alive (channel test) frames while the channel is
    /// open. `None` disables the keep-alive worker. This is deliberately not
    /// derived from the negotiated T3
    pub keepalive_interval: Option<Duration>,
}

impl Default for Tp20Settings {
    fn default() -> Self {
        Self {
            dest: 0x01,
            rx_id: 0x300,
            tx_id: 0x740,
            block_size: 0x0F,
            t1: 0x8A,
            t3: 0x32,
            timeout: Duration::from_secs(1),
            keepalive_interval: Some(Duration::from_millis(10)),
        }
    }
}

enum Tp20Command {
    Open(mpsc::Sender<DiagServerResult<()>>),
    Close(mpsc::Sender<DiagServerResult<()>>),
    Send(Vec<u8>, mpsc::Sender<DiagServerResult<()>>),
    Recv(Duration, mpsc::Sender<DiagServerResult<Vec<u8>>>),
}

impl std::fmt::Debug for Tp20Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(_) => write!(f, "Open"),
            Self::Close(_) => write!(f, "Close"),
            Self::Send(d, _) => write!(f, "Send({d:02X?})"),
            Self::Recv(t, _) => write!(f, "Recv({t:?})"),
        }
    }
}

/// TP 2.0 transport over a CAN channel.
///
/// All channel mutating operations execute on a background worker thread that
/// exclusively owns the CAN connection state; the public methods enqueue
/// commands and block on the reply. Once [Tp20Transport::close_channel] has
/// been called the worker exits and the transport cannot be reopened.
///
/// ```no_run
/// use legacy_diagnostics::kwp2000::Kwp2000Client;
/// use legacy_diagnostics::tp20::{Tp20Settings, Tp20Transport};
/// # fn get_can_channel() -> Box<dyn legacy_diagnostics::channel::CanChannel> { unimplemented!() }
///
/// let transport = Tp20Transport::new(get_can_channel(), Tp20Settings::default());
/// let mut client = Kwp2000Client::new(transport);
/// client.open().unwrap();
/// let ident = client.read_ecu_identification(None).unwrap();
/// println!("{ident:02X?}");
/// client.close().unwrap();
/// ```
#[derive(Debug)]
pub struct Tp20Transport {
    cmd_tx: mpsc::Sender<Tp20Command>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

impl Tp20Transport {
    /// Creates a new TP 2.0 transport over the given CAN channel. The worker
    /// threads start immediately but nothing is sent on the bus until
    /// [Self::open_channel]
    pub fn new(channel: Box<dyn CanChannel>, settings: Tp20Settings) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let channel_up = Arc::new(AtomicBool::new(false));
        let tx_can_id = Arc::new(AtomicU32::new(0));
        let can = Arc::new(Mutex::new(channel));

        let (cmd_tx, cmd_rx) = mpsc::channel::<Tp20Command>();

        let keepalive = settings.keepalive_interval.map(|interval| {
            let running_k = running.clone();
            let channel_up_k = channel_up.clone();
            let tx_id_k = tx_can_id.clone();
            let can_k = can.clone();
            std::thread::spawn(move || {
                while running_k.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if !channel_up_k.load(Ordering::Relaxed) {
                        continue;
                    }
                    let id = tx_id_k.load(Ordering::Relaxed);
                    // Send errors are swallowed so a glitch never kills the timer
                    let _ = can_k
                        .lock()
                        .unwrap()
                        .send_can_frame(id, &[frame::OP_CHANNEL_TEST]);
                }
            })
        });

        let running_w = running.clone();
        let worker = std::thread::spawn(move || {
            let mut state = ChannelWorker {
                can,
                settings,
                is_open: false,
                channel_up,
                rx_can_id: 0,
                tx_can_id,
                block_size: settings.block_size,
                t3: frame::decode_timing(settings.t3),
                tx_seq: 0,
                rx_seq: 0,
                rx_queue: VecDeque::new(),
            };
            while running_w.load(Ordering::Relaxed) {
                // Keep the RX queue warm while the channel is up
                if state.is_open {
                    if let Ok(mut can) = state.can.lock() {
                        if let Ok(Some(f)) = can.recv_can_frame(POLL_SLICE) {
                            state.rx_queue.push_back(f);
                        }
                    }
                }
                let cmd = match cmd_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(c) => c,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                };
                debug!("TP 2.0 command: {cmd:?}");
                match cmd {
                    Tp20Command::Open(resp) => {
                        let _ = resp.send(state.do_open());
                    }
                    Tp20Command::Close(resp) => {
                        let _ = resp.send(state.do_close());
                        running_w.store(false, Ordering::Relaxed);
                        break;
                    }
                    Tp20Command::Send(data, resp) => {
                        let _ = resp.send(state.do_send(&data));
                    }
                    Tp20Command::Recv(timeout, resp) => {
                        let _ = resp.send(state.do_recv(timeout));
                    }
                }
            }
        });

        Self {
            cmd_tx,
            running,
            worker: Some(worker),
            keepalive,
        }
    }

    fn submit<R>(
        &self,
        make: impl FnOnce(mpsc::Sender<DiagServerResult<R>>) -> Tp20Command,
    ) -> DiagServerResult<R> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| DiagError::Disconnected)?;
        rx.recv().unwrap_or(Err(DiagError::Disconnected))
    }

    /// Opens the CAN connection and establishes the TP 2.0 channel (setup
    /// plus parameter negotiation)
    pub fn open_channel(&mut self) -> DiagServerResult<()> {
        self.submit(Tp20Command::Open)
    }

    /// Disconnects the channel and shuts the worker down
    pub fn close_channel(&mut self) -> DiagServerResult<()> {
        let res = self.submit(Tp20Command::Close);
        self.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
        if let Some(h) = self.keepalive.take() {
            let _ = h.join();
        }
        res
    }

    /// Sends one application payload over the channel, segmenting and pacing
    /// as negotiated
    pub fn send_payload(&mut self, data: &[u8]) -> DiagServerResult<()> {
        self.submit(|tx| Tp20Command::Send(data.to_vec(), tx))
    }

    /// Receives one reassembled application payload
    pub fn recv_payload(&mut self, timeout: Duration) -> DiagServerResult<Vec<u8>> {
        self.submit(|tx| Tp20Command::Recv(timeout, tx))
    }
}

impl PayloadTransport for Tp20Transport {
    fn open(&mut self) -> DiagServerResult<()> {
        self.open_channel()
    }

    fn close(&mut self) -> DiagServerResult<()> {
        self.close_channel()
    }

    fn send(&mut self, payload: &[u8]) -> DiagServerResult<()> {
        self.send_payload(payload)
    }

    fn wait_frame(&mut self, timeout: Duration) -> DiagServerResult<Option<Vec<u8>>> {
        match self.recv_payload(timeout) {
            Ok(data) => Ok(Some(data)),
            Err(DiagError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Tp20Transport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Worker-side channel state. Everything here is owned and mutated by the
/// worker thread only; the keep-alive timer sees just the shared atomics
struct ChannelWorker {
    can: Arc<Mutex<Box<dyn CanChannel>>>,
    settings: Tp20Settings,
    is_open: bool,
    channel_up: Arc<AtomicBool>,
    rx_can_id: u32,
    tx_can_id: Arc<AtomicU32>,
    block_size: u8,
    t3: Duration,
    tx_seq: u8,
    rx_seq: u8,
    rx_queue: VecDeque<CanFrame>,
}

impl ChannelWorker {
    fn tx_id(&self) -> u32 {
        self.tx_can_id.load(Ordering::Relaxed)
    }

    fn send_frame(&self, id: u32, data: &[u8]) -> DiagServerResult<()> {
        self.can
            .lock()
            .unwrap()
            .send_can_frame(id, data)
            .map_err(DiagError::from)
    }

    /// Pops the next frame, preferring anything the RX pump already queued
    fn next_frame(&mut self, timeout: Duration) -> DiagServerResult<Option<CanFrame>> {
        if let Some(f) = self.rx_queue.pop_front() {
            return Ok(Some(f));
        }
        Ok(self.can.lock().unwrap().recv_can_frame(timeout)?)
    }

    fn do_open(&mut self) -> DiagServerResult<()> {
        if self.is_open {
            return Ok(());
        }
        self.can.lock().unwrap().open()?;
        self.is_open = true;
        match self.setup_channel().and_then(|_| self.negotiate_parameters()) {
            Ok(()) => {
                self.channel_up.store(true, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let _ = self.do_close();
                Err(e)
            }
        }
    }

    /// Sends the setup request on 0x200 and waits for the ECU's response on
    /// 0x200 + dest. On acceptance the tester transmits on the id the ECU
    /// labels TX and listens on the id the ECU labels RX; this mapping is an
    /// invariant of the engine, matching captured traffic
    fn setup_channel(&mut self) -> DiagServerResult<()> {
        let req = frame::build_setup_request(
            self.settings.dest,
            0x0000,
            false, // leave our listen id for the ECU to choose
            self.settings.rx_id,
            true, // ask the ECU to transmit on rx_id
            frame::APP_TYPE_KWP,
        );
        self.send_frame(frame::CAN_ID_SETUP_REQUEST, &req)?;

        let response_id = frame::CAN_ID_SETUP_RESPONSE_BASE + self.settings.dest as u32;
        let deadline = Instant::now() + self.settings.timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(DiagError::Timeout("TP 2.0 channel setup"));
            }
            let Some(f) = self.next_frame(POLL_SLICE)? else {
                continue;
            };
            if f.id() != response_id {
                continue;
            }
            match frame::parse_setup_response(f.data()) {
                Ok(resp) => {
                    self.tx_can_id.store(resp.tx_id as u32, Ordering::Relaxed);
                    self.rx_can_id = resp.rx_id as u32;
                    info!(
                        "TP 2.0 channel setup: RX id 0x{:03X}, TX id 0x{:03X}",
                        self.rx_can_id,
                        self.tx_id()
                    );
                    return Ok(());
                }
                Err(e @ DiagError::ChannelSetupRejected(_)) => return Err(e),
                Err(_) => continue,
            }
        }
    }

    /// Proposes block size / T1 / T3 on the negotiated TX id and stores what
    /// the ECU grants
    fn negotiate_parameters(&mut self) -> DiagServerResult<()> {
        let req = frame::build_parameters_request(
            self.settings.block_size,
            self.settings.t1,
            self.settings.t3,
        );
        self.send_frame(self.tx_id(), &req)?;

        let deadline = Instant::now() + self.settings.timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(DiagError::Timeout("TP 2.0 parameter negotiation"));
            }
            let Some(f) = self.next_frame(POLL_SLICE)? else {
                continue;
            };
            if f.id() != self.rx_can_id {
                continue;
            }
            let Ok(params) = frame::parse_parameters_response(f.data()) else {
                continue;
            };
            self.block_size = params.block_size.clamp(1, 15);
            self.t3 = frame::decode_timing(params.t3);
            debug!(
                "TP 2.0 parameters: block_size={} t1={:?} t3={:?}",
                self.block_size,
                frame::decode_timing(params.t1),
                self.t3
            );
            return Ok(());
        }
    }

    fn do_send(&mut self, data: &[u8]) -> DiagServerResult<()> {
        if !self.is_open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        if !self.channel_up.load(Ordering::Relaxed) {
            return Err(DiagError::Disconnected);
        }
        // 16-bit big endian length header ahead of the payload
        let mut payload = Vec::with_capacity(data.len() + 2);
        payload.push((data.len() >> 8) as u8);
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);
        self.send_segmented(&payload)
    }

    fn send_segmented(&mut self, payload: &[u8]) -> DiagServerResult<()> {
        let mut offset = 0;
        let mut block_count = 0u8;
        while offset < payload.len() {
            let chunk = &payload[offset..(offset + 7).min(payload.len())];
            let is_last = offset + chunk.len() >= payload.len();
            block_count += 1;
            let need_ack = block_count >= self.block_size || is_last;
            let op = match (need_ack, is_last) {
                (true, true) => DataOp::WaitAckLast,
                (true, false) => DataOp::WaitAckMore,
                (false, false) => DataOp::NoAckMore,
                (false, true) => DataOp::NoAckLast,
            };
            let mut f = frame::build_data_frame(op, self.tx_seq, chunk);
            f.resize(8, 0x00);
            self.send_frame(self.tx_id(), &f)?;

            let sent_seq = self.tx_seq;
            // 4-bit counter, continues across messages
            self.tx_seq = (self.tx_seq + 1) & frame::SEQ_MASK;

            if need_ack {
                self.wait_for_ack(sent_seq)?;
                block_count = 0;
            }
            offset += chunk.len();
            if offset < payload.len() {
                std::thread::sleep(self.t3);
            }
        }
        Ok(())
    }

    /// Blocks until the peer acknowledges `sent_seq`. The ACK carries the
    /// next expected sequence number, `(sent_seq + 1) & 0xF`. A not-ready ACK
    /// defers; data frames that arrive meanwhile are buffered for the next
    /// receive
    fn wait_for_ack(&mut self, sent_seq: u8) -> DiagServerResult<()> {
        let expected = (sent_seq + 1) & frame::SEQ_MASK;
        let deadline = Instant::now() + self.settings.timeout;
        loop {
            if Instant::now() >= deadline {
                warn!("TP 2.0 ACK timeout for sequence {sent_seq}");
                return Err(DiagError::AckTimeout(sent_seq));
            }
            let Some(f) = self.next_frame(POLL_SLICE)? else {
                continue;
            };
            if f.id() != self.rx_can_id {
                continue;
            }
            let data = f.data();
            if data == [frame::OP_CHANNEL_TEST] {
                continue;
            }
            if data == [frame::OP_DISCONNECT] {
                self.channel_up.store(false, Ordering::Relaxed);
                return Err(DiagError::Disconnected);
            }
            let Some((op, seq, _)) = frame::parse_data_frame(data) else {
                continue;
            };
            if op.is_ack() {
                if seq != expected {
                    warn!("TP 2.0 stale ACK seq {seq}, expected {expected}");
                    continue;
                }
                if op == DataOp::AckNotReady {
                    std::thread::sleep(POLL_SLICE);
                    continue;
                }
                return Ok(());
            }
            // Data frame racing our send; keep it for the next receive
            self.rx_queue.push_back(f);
        }
    }

    fn do_recv(&mut self, timeout: Duration) -> DiagServerResult<Vec<u8>> {
        if !self.is_open {
            return Err(DiagError::ChannelError(ChannelError::InterfaceNotOpen));
        }
        if !self.channel_up.load(Ordering::Relaxed) {
            return Err(DiagError::Disconnected);
        }
        let start = Instant::now();
        let mut buffer: Vec<u8> = Vec::new();
        let mut expected_len: Option<usize> = None;
        let mut last_seq: Option<u8> = None;

        loop {
            if start.elapsed() >= timeout {
                return Err(DiagError::Timeout("TP 2.0 frame"));
            }
            let Some(f) = self.next_frame(POLL_SLICE)? else {
                continue;
            };
            if f.id() != self.rx_can_id {
                continue;
            }
            let data = f.data();
            if data == [frame::OP_CHANNEL_TEST] {
                // Peer keep-alive, consumed silently
                continue;
            }
            if data == [frame::OP_DISCONNECT] {
                self.channel_up.store(false, Ordering::Relaxed);
                return Err(DiagError::Disconnected);
            }
            let Some((op, seq, payload)) = frame::parse_data_frame(data) else {
                continue;
            };
            if op.is_ack() {
                continue;
            }
            if let Some(prev) = last_seq {
                let expected = (prev + 1) & frame::SEQ_MASK;
                if seq != expected {
                    warn!("TP 2.0 sequence error, expected {expected} got {seq}; restarting reassembly");
                    buffer.clear();
                    expected_len = None;
                    last_seq = None;
                }
            }
            match expected_len {
                None => {
                    // First frame of a message: 16-bit length ahead of the data
                    if payload.len() < 2 {
                        continue;
                    }
                    expected_len = Some(((payload[0] as usize) << 8) | payload[1] as usize);
                    buffer.extend_from_slice(&payload[2..]);
                }
                Some(_) => buffer.extend_from_slice(payload),
            }
            last_seq = Some(seq);
            self.rx_seq = (seq + 1) & frame::SEQ_MASK;

            if op.requires_ack() {
                let ack = frame::build_data_frame(DataOp::AckReady, self.rx_seq, &[]);
                self.send_frame(self.tx_id(), &ack)?;
            }

            if let Some(len) = expected_len {
                if buffer.len() >= len {
                    buffer.truncate(len);
                    debug!("TP 2.0 received payload: {buffer:02X?}");
                    return Ok(buffer);
                }
            }
        }
    }

    /// Sends the disconnect frame and waits briefly for the peer's echo.
    /// Either outcome transitions the channel to closed
    fn do_close(&mut self) -> DiagServerResult<()> {
        if !self.is_open {
            self.reset();
            return Ok(());
        }
        if self.channel_up.load(Ordering::Relaxed) {
            self.channel_up.store(false, Ordering::Relaxed);
            if self.send_frame(self.tx_id(), &[frame::OP_DISCONNECT]).is_ok() {
                let deadline = Instant::now() + DISCONNECT_TIMEOUT;
                while Instant::now() < deadline {
                    match self.next_frame(POLL_SLICE) {
                        Ok(Some(f))
                            if f.id() == self.rx_can_id
                                && f.data() == [frame::OP_DISCONNECT] =>
                        {
                            break;
                        }
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
        let res = self.can.lock().unwrap().close().map_err(DiagError::from);
        self.reset();
        res
    }

    fn reset(&mut self) {
        self.is_open = false;
        self.channel_up.store(false, Ordering::Relaxed);
        self.rx_can_id = 0;
        self.tx_can_id.store(0, Ordering::Relaxed);
        self.block_size = self.settings.block_size;
        self.t3 = frame::decode_timing(self.settings.t3);
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.rx_queue.clear();
    }
}
