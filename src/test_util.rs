use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::connection::{Capabilities, Connection, ConnectionError};
use crate::error::ScpError;
use crate::pending::Completion;
use crate::wire::{ScpRequest, ScpResponse, ScpResponseHeader, ScpResult, SdpFlag, SdpHeader};

/// What the simulated device does with one incoming request
#[derive(Debug, Clone)]
pub struct Reply {
    pub result: ScpResult,
    pub payload: Bytes,
    pub delay: Duration,
}
impl Reply {
    pub fn ok() -> Reply {
        Reply::result(ScpResult::Ok)
    }

    pub fn result(result: ScpResult) -> Reply {
        Reply {
            result,
            payload: Bytes::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_payload(mut self, payload: &'static [u8]) -> Reply {
        self.payload = Bytes::from_static(payload);
        self
    }

    pub fn after(mut self, delay: Duration) -> Reply {
        self.delay = delay;
        self
    }
}

/// Decides how the device answers: gets the request, the index of the request in order of
///  first arrival (starting at 0) and the attempt number (1 for the first transmission).
///  `None` means the request is silently dropped.
pub type Behaviour = Box<dyn Fn(&ScpRequest, usize, u32) -> Option<Reply> + Send + Sync>;

#[derive(Default)]
struct DeviceState {
    /// every request datagram as it was received, with its sequence number
    received: Vec<(ScpRequest, u16)>,
    /// sequence number -> (request index, number of attempts)
    attempts: FxHashMap<u16, (usize, u32)>,
    /// (earliest delivery, datagram)
    replies: Vec<(Instant, Bytes)>,
}

/// An in-memory board that answers requests according to a [Behaviour]. Replies become
///  available to `receive` after their delay, measured in tokio time, so tests should run on a
///  paused clock.
pub struct SimulatedDevice {
    behaviour: Behaviour,
    capabilities: Capabilities,
    state: Mutex<DeviceState>,
    notify: Notify,
}

impl SimulatedDevice {
    pub fn new(behaviour: impl Fn(&ScpRequest, usize, u32) -> Option<Reply> + Send + Sync + 'static) -> SimulatedDevice {
        SimulatedDevice {
            behaviour: Box::new(behaviour),
            capabilities: Capabilities::SCP,
            state: Mutex::new(DeviceState::default()),
            notify: Notify::new(),
        }
    }

    pub fn answering_ok() -> SimulatedDevice {
        Self::new(|_, _, _| Some(Reply::ok()))
    }

    pub fn silent() -> SimulatedDevice {
        Self::new(|_, _, _| None)
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> SimulatedDevice {
        self.capabilities = capabilities;
        self
    }

    /// makes a raw datagram available to the next `receive`
    pub fn inject(&self, datagram: Bytes) {
        self.state.lock().unwrap()
            .replies.push((Instant::now(), datagram));
        self.notify.notify_one();
    }

    pub fn num_received(&self) -> usize {
        self.state.lock().unwrap().received.len()
    }

    pub fn received(&self) -> Vec<(ScpRequest, u16)> {
        self.state.lock().unwrap().received.clone()
    }

    /// how often the request with the given index (in order of first arrival) was received
    pub fn attempts_of(&self, request_index: usize) -> u32 {
        self.state.lock().unwrap()
            .attempts.values()
            .find(|(index, _)| *index == request_index)
            .map(|(_, attempts)| *attempts)
            .unwrap_or(0)
    }

    pub fn response_datagram(sequence: u16, reply: &Reply) -> Bytes {
        ScpResponse {
            sdp_header: SdpHeader::for_host_request(SdpFlag::ReplyNotExpected, 7, 0, 0, 31),
            header: ScpResponseHeader {
                result: reply.result,
                sequence,
            },
            payload: reply.payload.clone(),
        }.to_datagram()
    }

    fn take_ready_reply(&self, now: Instant) -> Option<Bytes> {
        let mut state = self.state.lock().unwrap();
        let (idx, _) = state.replies.iter()
            .enumerate()
            .filter(|(_, (ready_at, _))| *ready_at <= now)
            .min_by_key(|(_, (ready_at, _))| *ready_at)?;
        Some(state.replies.remove(idx).1)
    }

    fn next_reply_at(&self) -> Option<Instant> {
        self.state.lock().unwrap()
            .replies.iter()
            .map(|(ready_at, _)| *ready_at)
            .min()
    }
}

#[async_trait]
impl Connection for SimulatedDevice {
    async fn send(&self, datagram: &[u8]) -> Result<(), ConnectionError> {
        let (request, sequence) = ScpRequest::from_datagram(datagram)
            .expect("simulated device received an undecodable request");

        let (request_index, attempt) = {
            let mut state = self.state.lock().unwrap();
            state.received.push((request.clone(), sequence));
            let next_index = state.attempts.len();
            let entry = state.attempts.entry(sequence).or_insert((next_index, 0));
            entry.1 += 1;
            *entry
        };

        if let Some(reply) = (self.behaviour)(&request, request_index, attempt) {
            let datagram = Self::response_datagram(sequence, &reply);
            self.state.lock().unwrap()
                .replies.push((Instant::now() + reply.delay, datagram));
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Bytes, ConnectionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if let Some(datagram) = self.take_ready_reply(now) {
                return Ok(datagram);
            }
            if now >= deadline {
                return Err(ConnectionError::Timeout);
            }
            let wake_at = self.next_reply_at()
                .map(|t| t.min(deadline))
                .unwrap_or(deadline);
            let _ = time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    fn is_ready_to_receive(&self) -> bool {
        self.next_reply_at()
            .map(|t| t <= Instant::now())
            .unwrap_or(false)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// Collects request outcomes by a caller-chosen id, for checking exactly-once completion
#[derive(Clone, Default)]
pub struct CompletionLog {
    outcomes: Arc<Mutex<Vec<(usize, Result<ScpResponse, ScpError>)>>>,
}
impl CompletionLog {
    pub fn new() -> CompletionLog {
        CompletionLog::default()
    }

    pub fn completion(&self, id: usize) -> Completion {
        let outcomes = self.outcomes.clone();
        Box::new(move |result| outcomes.lock().unwrap().push((id, result)))
    }

    pub fn outcomes(&self) -> Vec<(usize, Result<ScpResponse, ScpError>)> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    /// ids in order of completion
    pub fn ids(&self) -> Vec<usize> {
        self.outcomes.lock().unwrap().iter()
            .map(|(id, _)| *id)
            .collect()
    }
}

pub fn read_request(x: u8, y: u8) -> ScpRequest {
    ScpRequest::new(SdpHeader::for_host_request(SdpFlag::ReplyExpected, 0, x, y, 0), crate::wire::ScpCommand::Read)
        .with_arguments([Some(0x7000_0000), Some(4), Some(2)])
}
