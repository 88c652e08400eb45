//! Simulation channels for unit testing protocol engines without hardware
//!
//! [SimulationByteChannel] plays back scripted byte chunks;
//! [SimulationCanChannel] additionally supports request/response scripting,
//! where a transmitted frame triggers a canned sequence of received frames.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    channel::{ByteChannel, CanChannel, CanFrame, ChannelResult, PayloadTransport},
    DiagServerResult,
};

/// Scripted [ByteChannel]. Clones share the same state, so a test can keep a
/// handle for scripting and inspection while the channel itself is moved
/// into a client
#[derive(Debug, Clone, Default)]
pub struct SimulationByteChannel {
    inner: Arc<Mutex<ByteInner>>,
}

#[derive(Debug, Default)]
struct ByteInner {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<Vec<u8>>,
    baud_changes: Vec<u32>,
    responses: VecDeque<(Vec<u8>, Vec<Vec<u8>>)>,
}

impl SimulationByteChannel {
    /// Creates an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a chunk of bytes to be handed out by a later `wait_frame`
    pub fn queue_rx(&self, chunk: &[u8]) {
        self.inner.lock().unwrap().rx.push_back(chunk.to_vec());
    }

    /// Returns everything written to the channel so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().tx.clone()
    }

    /// Returns the baud rate changes requested on the channel
    pub fn baud_changes(&self) -> Vec<u32> {
        self.inner.lock().unwrap().baud_changes.clone()
    }

    /// Binds a sequence of receive chunks to a written byte string. The
    /// first write matching `request` consumes the binding and queues the
    /// chunks
    pub fn add_response(&self, request: &[u8], chunks: &[&[u8]]) {
        self.inner.lock().unwrap().responses.push_back((
            request.to_vec(),
            chunks.iter().map(|c| c.to_vec()).collect(),
        ));
    }
}

impl ByteChannel for SimulationByteChannel {
    fn open(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> ChannelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tx.push(data.to_vec());
        if let Some(pos) = inner.responses.iter().position(|(req, _)| req == data) {
            let (_, chunks) = inner.responses.remove(pos).unwrap();
            inner.rx.extend(chunks);
        }
        Ok(())
    }

    fn wait_frame(&mut self, timeout: Duration) -> ChannelResult<Option<Vec<u8>>> {
        if let Some(chunk) = self.inner.lock().unwrap().rx.pop_front() {
            return Ok(Some(chunk));
        }
        // Nothing scripted; burn a slice of the window so callers don't spin
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(None)
    }

    fn set_baudrate(&mut self, baud: u32) -> ChannelResult<()> {
        self.inner.lock().unwrap().baud_changes.push(baud);
        Ok(())
    }
}

/// Scripted [CanChannel]. Frames can be queued directly, or bound to a
/// transmitted frame so they appear in the receive queue the moment that
/// frame goes out (one shot per binding)
#[derive(Debug, Clone, Default)]
pub struct SimulationCanChannel {
    inner: Arc<Mutex<CanInner>>,
}

#[derive(Debug, Default)]
struct CanInner {
    rx: VecDeque<CanFrame>,
    tx: Vec<CanFrame>,
    responses: VecDeque<(u32, Vec<u8>, Vec<CanFrame>)>,
}

impl SimulationCanChannel {
    /// Creates an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame to be received unconditionally
    pub fn queue_frame(&self, id: u32, data: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .rx
            .push_back(CanFrame::new(id, data));
    }

    /// Binds a canned response sequence to a transmitted frame. The first
    /// transmission matching `(id, data)` consumes the binding and enqueues
    /// the responses
    pub fn add_response(&self, id: u32, data: &[u8], responses: &[(u32, &[u8])]) {
        self.inner.lock().unwrap().responses.push_back((
            id,
            data.to_vec(),
            responses
                .iter()
                .map(|(rid, rdata)| CanFrame::new(*rid, rdata))
                .collect(),
        ));
    }

    /// Returns every frame transmitted so far
    pub fn sent(&self) -> Vec<CanFrame> {
        self.inner.lock().unwrap().tx.clone()
    }

    /// Returns transmitted frames, skipping keep-alive (0xA3) frames
    pub fn sent_without_keepalive(&self) -> Vec<CanFrame> {
        self.sent()
            .into_iter()
            .filter(|f| f.data() != [0xA3])
            .collect()
    }
}

impl CanChannel for SimulationCanChannel {
    fn open(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn send_can_frame(&mut self, id: u32, data: &[u8]) -> ChannelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tx.push(CanFrame::new(id, data));
        if let Some(pos) = inner
            .responses
            .iter()
            .position(|(rid, rdata, _)| *rid == id && rdata == data)
        {
            let (_, _, frames) = inner.responses.remove(pos).unwrap();
            inner.rx.extend(frames);
        }
        Ok(())
    }

    fn recv_can_frame(&mut self, timeout: Duration) -> ChannelResult<Option<CanFrame>> {
        if let Some(f) = self.inner.lock().unwrap().rx.pop_front() {
            return Ok(Some(f));
        }
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(None)
    }
}

/// Scripted [PayloadTransport] for exercising the KWP2000 client without any
/// link layer underneath. Each queued request maps to a sequence of response
/// payloads handed out one per `wait_frame` call
#[derive(Debug, Clone, Default)]
pub struct SimulationPayloadTransport {
    inner: Arc<Mutex<PayloadInner>>,
}

#[derive(Debug, Default)]
struct PayloadInner {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<Vec<u8>>,
    responses: VecDeque<(Vec<u8>, Vec<Vec<u8>>)>,
}

impl SimulationPayloadTransport {
    /// Creates an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a sequence of response payloads to a request payload (one shot)
    pub fn add_response(&self, request: &[u8], responses: &[&[u8]]) {
        self.inner.lock().unwrap().responses.push_back((
            request.to_vec(),
            responses.iter().map(|r| r.to_vec()).collect(),
        ));
    }

    /// Returns every payload sent so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().tx.clone()
    }
}

impl PayloadTransport for SimulationPayloadTransport {
    fn open(&mut self) -> DiagServerResult<()> {
        Ok(())
    }

    fn close(&mut self) -> DiagServerResult<()> {
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> DiagServerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tx.push(payload.to_vec());
        if let Some(pos) = inner.responses.iter().position(|(req, _)| req == payload) {
            let (_, resps) = inner.responses.remove(pos).unwrap();
            inner.rx.extend(resps);
        }
        Ok(())
    }

    fn wait_frame(&mut self, timeout: Duration) -> DiagServerResult<Option<Vec<u8>>> {
        if let Some(r) = self.inner.lock().unwrap().rx.pop_front() {
            return Ok(Some(r));
        }
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(None)
    }
}
