use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::error;

use crate::error::{panic_message, RetryReason, ScpError};
use crate::sequence::SequenceNumber;
use crate::wire::{CoreLocation, ScpCommand, ScpResponse};

/// Called exactly once per request, with either the (successful) response or the reason why
///  the request failed
pub type Completion = Box<dyn FnOnce(Result<ScpResponse, ScpError>) + Send>;

/// Calls a completion, containing a panic inside it
pub fn call_completion(completion: Completion, result: Result<ScpResponse, ScpError>, describe: impl FnOnce() -> String) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || completion(result))) {
        error!("completion for {} panicked: {}", describe(), panic_message(payload.as_ref()));
    }
}

/// Bookkeeping for a request that was sent and is waiting for its response
pub struct PendingRequest {
    pub sequence: u16,
    pub command: ScpCommand,
    pub destination: CoreLocation,
    /// the exact bytes that were sent, kept for resending
    pub datagram: Bytes,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub retries_remaining: u32,
    pub retry_reasons: Vec<RetryReason>,
    /// set while a resend after a retryable result is waiting for its turn. Such a request is
    ///  never overdue.
    pub scheduled_resend: Option<Instant>,
    completion: Completion,
}

impl Debug for PendingRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("sequence", &self.sequence)
            .field("command", &self.command)
            .field("destination", &self.destination)
            .field("retries_remaining", &self.retries_remaining)
            .field("retry_reasons", &self.retry_reasons)
            .field("scheduled_resend", &self.scheduled_resend)
            .finish()
    }
}

impl PendingRequest {
    pub fn new(sequence: u16, command: ScpCommand, destination: CoreLocation, datagram: Bytes, now: Instant, retries: u32, completion: Completion) -> PendingRequest {
        PendingRequest {
            sequence,
            command,
            destination,
            datagram,
            first_sent: now,
            last_sent: now,
            retries_remaining: retries,
            retry_reasons: Vec::new(),
            scheduled_resend: None,
            completion,
        }
    }

    /// Consumes the record, so the completion can not be called twice. A panicking completion
    ///  is logged and otherwise ignored, it must not take other requests down with it.
    pub fn complete(self, result: Result<ScpResponse, ScpError>) {
        let PendingRequest { sequence, command, completion, .. } = self;
        call_completion(completion, result, || format!("{:?} request {}", command, SequenceNumber(sequence)));
    }

    pub fn fail(self, error: ScpError) {
        self.complete(Err(error))
    }

    pub fn is_overdue(&self, now: Instant, packet_timeout: Duration) -> bool {
        self.scheduled_resend.is_none()
            && now.saturating_duration_since(self.last_sent) >= packet_timeout
    }

    /// the point in time at which something has to happen for this request
    pub fn deadline(&self, packet_timeout: Duration) -> Instant {
        self.scheduled_resend
            .unwrap_or(self.last_sent + packet_timeout)
    }

    pub fn within_soft_retry_budget(&self, now: Instant, packet_timeout: Duration) -> bool {
        now.saturating_duration_since(self.first_sent) < packet_timeout
    }

    pub fn only_timeouts(&self) -> bool {
        self.retry_reasons.iter().all(|r| *r == RetryReason::Timeout)
    }

    pub fn last_device_result(&self) -> Option<crate::wire::ScpResult> {
        self.retry_reasons.iter().rev()
            .find_map(|r| match r {
                RetryReason::DeviceResult(result) => Some(*result),
                RetryReason::Timeout => None,
            })
    }
}

/// The requests a transport is waiting for, indexed by sequence number
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    requests: FxHashMap<u16, PendingRequest>,
}

impl PendingRequestTable {
    pub fn new() -> PendingRequestTable {
        PendingRequestTable::default()
    }

    pub fn insert(&mut self, request: PendingRequest) {
        let sequence = request.sequence;
        let previous = self.requests.insert(sequence, request);
        assert!(previous.is_none(), "this is a bug: sequence number {} was allocated while still in use", sequence);
    }

    pub fn contains(&self, sequence: u16) -> bool {
        self.requests.contains_key(&sequence)
    }

    pub fn get(&self, sequence: u16) -> Option<&PendingRequest> {
        self.requests.get(&sequence)
    }

    pub fn get_mut(&mut self, sequence: u16) -> Option<&mut PendingRequest> {
        self.requests.get_mut(&sequence)
    }

    pub fn remove(&mut self, sequence: u16) -> Option<PendingRequest> {
        self.requests.remove(&sequence)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// sequence numbers of all requests that were last sent at least `packet_timeout` ago,
    ///  oldest first
    pub fn overdue(&self, now: Instant, packet_timeout: Duration) -> Vec<u16> {
        let mut result = self.requests.values()
            .filter(|r| r.is_overdue(now, packet_timeout))
            .map(|r| (r.last_sent, r.sequence))
            .collect::<Vec<_>>();
        result.sort();
        result.into_iter()
            .map(|(_, sequence)| sequence)
            .collect()
    }

    /// sequence numbers of all requests with a scheduled resend that is due, in order of
    ///  their schedule
    pub fn due_resends(&self, now: Instant) -> Vec<u16> {
        let mut result = self.requests.values()
            .filter_map(|r| r.scheduled_resend.map(|at| (at, r.sequence)))
            .filter(|(at, _)| *at <= now)
            .collect::<Vec<_>>();
        result.sort();
        result.into_iter()
            .map(|(_, sequence)| sequence)
            .collect()
    }

    /// the point in time at which the next request becomes overdue or has a resend due
    pub fn next_deadline(&self, packet_timeout: Duration) -> Option<Instant> {
        self.requests.values()
            .map(|r| r.deadline(packet_timeout))
            .min()
    }

    pub fn drain_all(&mut self) -> Vec<PendingRequest> {
        self.requests.drain()
            .map(|(_, r)| r)
            .collect()
    }
}
