use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::commands::{into_completion, Command};
use crate::config::TransportConfig;
use crate::connection::{Capabilities, Connection, ConnectionError};
use crate::error::{RetryReason, ScpError, TimeoutKind};
use crate::pending::{Completion, PendingRequest, PendingRequestTable};
use crate::sequence::{SequenceAllocator, SequenceNumber};
use crate::window::{Window, WindowState};
use crate::wire::{ScpRequest, ScpResponse, ScpResult};

/// Counters for one transport, mostly useful for tuning timeouts and window sizes
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TransportStats {
    /// number of times waiting for a response timed out
    pub n_timeouts: u64,
    /// resends that used up one of a request's retries
    pub n_resent: u64,
    /// resends after a retryable result within the packet timeout, which do not use up retries
    pub n_retry_code_resent: u64,
    /// the window size, once it is known
    pub channels: Option<usize>,
}

/// Rejects requests the connection can not carry, and requests that would never be answered
pub fn check_supported(capabilities: Capabilities, request: &ScpRequest) -> Result<(), ScpError> {
    if !capabilities.contains(request.required_capabilities) {
        return Err(ScpError::UnsupportedOperation(format!(
            "{:?} requires {:?}, connection supports {:?}", request.command, request.required_capabilities, capabilities
        )));
    }
    if request.data.len() > ScpRequest::MAX_DATA_LEN {
        return Err(ScpError::UnsupportedOperation(format!(
            "{:?} with {} bytes of data, maximum is {}", request.command, request.data.len(), ScpRequest::MAX_DATA_LEN
        )));
    }
    if !request.is_reply_expected() {
        return Err(ScpError::UnsupportedOperation(format!(
            "{:?} without a reply can not be tracked", request.command
        )));
    }
    Ok(())
}

/// What to do with a pending request after a datagram for it arrived
#[derive(Debug)]
enum Disposition {
    Complete(ScpResponse),
    /// retryable result within the packet timeout: resend after a short pause, keep the retry
    ///  budget
    ResendSoon(ScpResult),
    Retry(RetryReason),
    Fail(ScpError),
}

/// Reliable delivery of requests over one connection: Requests are numbered, tracked until
///  their response arrives, and resent on timeouts or retryable results. The number of
///  requests in flight is bounded by a window.
///
/// A transport has exactly one owner, which drives it by calling `enqueue_request`, `drain`
///  and `finish`. Requests complete out of order. Every request that was accepted by
///  `enqueue_request` has its completion called exactly once, at the latest when `finish`
///  returns.
pub struct WindowedTransport {
    connection: Arc<dyn Connection>,
    config: Arc<TransportConfig>,
    window: WindowState,
    /// set when the window is full, cleared once in-flight requests dropped to the window's
    ///  resume threshold
    throttled: bool,
    sequences: SequenceAllocator,
    pending: PendingRequestTable,
    stats: TransportStats,
}

impl WindowedTransport {
    pub fn new(connection: Arc<dyn Connection>, config: Arc<TransportConfig>) -> WindowedTransport {
        let window = WindowState::new(&config.window);
        WindowedTransport {
            connection,
            config,
            window,
            throttled: false,
            sequences: SequenceAllocator::new(),
            pending: PendingRequestTable::new(),
            stats: TransportStats::default(),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn in_progress(&self) -> usize {
        self.pending.len()
    }

    pub fn window(&self) -> Option<Window> {
        self.window.window()
    }

    /// true while no new requests should be sent
    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            channels: self.window.window().map(|w| w.channels),
            ..self.stats
        }
    }

    /// Sends a typed command, calling exactly one of the callbacks with the decoded response
    ///  or the error
    pub async fn enqueue<C: Command>(
        &mut self,
        command: C,
        on_success: impl FnOnce(C::Response) + Send + 'static,
        on_error: impl FnOnce(ScpError) + Send + 'static,
    ) -> Result<(), ScpError> {
        let (request, completion) = into_completion(command, on_success, on_error);
        self.enqueue_request(request, completion).await
    }

    /// Sends a request, waiting for room in the window first if necessary.
    ///
    /// Returns an error only if the connection can not carry the request at all, in which case
    ///  nothing was sent and `completion` is dropped without being called. All other problems
    ///  are reported through `completion`.
    pub async fn enqueue_request(&mut self, request: ScpRequest, completion: Completion) -> Result<(), ScpError> {
        check_supported(self.connection.capabilities(), &request)?;

        self.calibrate_if_ready();
        self.wait_for_room().await;
        self.send_new(request, completion).await;
        Ok(())
    }

    /// The first time the connection has a response waiting, the number of requests in flight
    ///  approximates what the device can buffer. That is the basis for sizing the window.
    fn calibrate_if_ready(&mut self) {
        if !self.window.needs_calibration() || !self.connection.is_ready_to_receive() {
            return;
        }

        let in_progress = self.pending.len();
        if let Some(window) = self.window.calibrate(in_progress) {
            debug!("calibrated window with {} requests in flight: {} channels, resuming at {}", in_progress, window.channels, window.intermediate_waits);
            self.update_throttle();
        }
    }

    async fn wait_for_room(&mut self) {
        if self.throttled {
            trace!("window full with {} requests in flight - draining down to {}", self.pending.len(), self.window.resume_threshold());
            self.drain(self.window.resume_threshold(), self.config.packet_timeout).await;
        }

        // an uncalibrated window is unbounded, but the sequence number space is not
        if self.pending.len() >= SequenceAllocator::NUM_SEQUENCES {
            self.drain(SequenceAllocator::NUM_SEQUENCES - 1, self.config.packet_timeout).await;
        }
    }

    async fn send_new(&mut self, request: ScpRequest, completion: Completion) {
        let sequence = self.sequences.next_free(|s| self.pending.contains(s))
            .expect("this is a bug: no free sequence number although there is room in the window");

        let datagram = request.to_datagram(sequence);
        trace!("sending {:?} as {}", request.command, SequenceNumber(sequence));

        self.pending.insert(PendingRequest::new(
            sequence,
            request.command,
            request.sdp_header.destination(),
            datagram.clone(),
            Instant::now(),
            self.config.n_retries,
            completion,
        ));
        self.update_throttle();
        self.transmit(sequence, &datagram).await;
    }

    async fn transmit(&mut self, sequence: u16, datagram: &[u8]) {
        if let Err(e) = self.connection.send(datagram).await {
            error!("error sending request {}: {}", SequenceNumber(sequence), e);
            if let Some(pending) = self.retire(sequence) {
                pending.fail(e.into());
            }
        }
    }

    /// Receives responses until at most `max_remaining` requests are in flight. Each wait for
    ///  a datagram is bounded by `timeout` and by the point in time when the next request
    ///  becomes overdue.
    pub async fn drain(&mut self, max_remaining: usize, timeout: Duration) {
        while self.pending.len() > max_remaining {
            let wait = self.next_receive_timeout()
                .map(|t| t.min(timeout))
                .unwrap_or(timeout);
            let received = self.connection.receive(wait).await;
            self.on_receive_result(received).await;
        }
    }

    /// Waits until every request in flight is completed, one way or the other
    pub async fn finish(&mut self) {
        debug!("finishing {} requests in flight", self.pending.len());
        self.drain(0, self.config.packet_timeout).await;
    }

    /// time until the oldest request in flight becomes overdue or has a scheduled resend due,
    ///  `None` if nothing is in flight
    pub fn next_receive_timeout(&self) -> Option<Duration> {
        self.pending.next_deadline(self.config.packet_timeout)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub async fn on_receive_result(&mut self, received: Result<Bytes, ConnectionError>) {
        match received {
            Ok(datagram) => self.on_datagram(datagram).await,
            Err(ConnectionError::Timeout) => self.handle_receive_timeout().await,
            Err(ConnectionError::Io(e)) => {
                error!("error receiving from connection: {} - failing all {} requests in flight", e, self.pending.len());
                self.fail_all(ScpError::io(e));
            }
        }
        self.send_due_resends().await;
    }

    async fn send_due_resends(&mut self) {
        let now = Instant::now();
        for sequence in self.pending.due_resends(now) {
            let datagram = match self.pending.get_mut(sequence) {
                Some(pending) => {
                    pending.scheduled_resend = None;
                    pending.last_sent = now;
                    pending.datagram.clone()
                }
                None => continue,
            };
            self.stats.n_retry_code_resent += 1;
            trace!("resending {} after a retryable result", SequenceNumber(sequence));
            self.transmit(sequence, &datagram).await;
        }
    }

    /// Resends every request that is overdue, not only the oldest: a busy device tends to
    ///  drop many packets at once.
    pub async fn handle_receive_timeout(&mut self) {
        self.stats.n_timeouts += 1;

        let overdue = self.pending.overdue(Instant::now(), self.config.packet_timeout);
        if !overdue.is_empty() {
            debug!("receive timed out, {} of {} requests in flight are overdue", overdue.len(), self.pending.len());
        }
        for sequence in overdue {
            self.resend(sequence, RetryReason::Timeout).await;
        }
    }

    async fn on_datagram(&mut self, datagram: Bytes) {
        let sequence = match ScpResponse::sequence_of(&datagram) {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!("dropping datagram without a readable sequence number: {}", e);
                return;
            }
        };

        let disposition = match self.pending.get(sequence) {
            Some(pending) => self.disposition(pending, datagram),
            None => {
                debug!("discarding response for {} which is not in flight", SequenceNumber(sequence));
                return;
            }
        };
        trace!("response for {}: {:?}", SequenceNumber(sequence), disposition);

        match disposition {
            Disposition::Complete(response) => {
                if let Some(pending) = self.retire(sequence) {
                    pending.complete(Ok(response));
                }
            }
            Disposition::ResendSoon(result) => {
                let resend_at = Instant::now() + self.config.retry_code_delay;
                if let Some(pending) = self.pending.get_mut(sequence) {
                    pending.scheduled_resend = Some(resend_at);
                }
                trace!("device answered {} with {:?} - resending in {:?}", SequenceNumber(sequence), result, self.config.retry_code_delay);
            }
            Disposition::Retry(reason) => self.resend(sequence, reason).await,
            Disposition::Fail(error) => {
                if let Some(pending) = self.retire(sequence) {
                    debug!("request {} failed: {}", SequenceNumber(sequence), error);
                    pending.fail(error);
                }
            }
        }
    }

    fn disposition(&self, pending: &PendingRequest, datagram: Bytes) -> Disposition {
        let response = match ScpResponse::from_datagram(datagram) {
            Ok(response) => response,
            Err(e) => return Disposition::Fail(e),
        };

        match response.header.result {
            ScpResult::Ok => Disposition::Complete(response),
            result if self.config.is_retryable(result) => {
                if pending.within_soft_retry_budget(Instant::now(), self.config.packet_timeout) {
                    Disposition::ResendSoon(result)
                }
                else {
                    Disposition::Retry(RetryReason::DeviceResult(result))
                }
            }
            result => Disposition::Fail(ScpError::UnexpectedResult {
                command: pending.command,
                destination: pending.destination,
                result,
            }),
        }
    }

    /// Sends a request again, using up one of its retries. A request without retries left
    ///  fails instead.
    async fn resend(&mut self, sequence: u16, reason: RetryReason) {
        let retries_remaining = match self.pending.get(sequence) {
            Some(pending) => pending.retries_remaining,
            None => return,
        };

        if retries_remaining == 0 {
            if let Some(mut pending) = self.retire(sequence) {
                pending.retry_reasons.push(reason);
                let error = self.exhausted_error(&pending);
                warn!("request {} failed: {}", SequenceNumber(sequence), error);
                pending.fail(error);
            }
            return;
        }

        let datagram = match self.pending.get_mut(sequence) {
            Some(pending) => {
                pending.retries_remaining -= 1;
                pending.retry_reasons.push(reason);
                pending.scheduled_resend = None;
                pending.last_sent = Instant::now();
                pending.datagram.clone()
            }
            None => return,
        };

        self.stats.n_resent += 1;
        debug!("resending {} ({})", SequenceNumber(sequence), reason);
        self.transmit(sequence, &datagram).await;
    }

    fn exhausted_error(&self, pending: &PendingRequest) -> ScpError {
        if pending.only_timeouts() {
            ScpError::Timeout {
                command: Some(pending.command),
                destination: pending.destination,
                kind: TimeoutKind::RetriesUsedUp,
                retries: self.config.n_retries,
                packet_timeout: self.config.packet_timeout,
            }
        }
        else {
            ScpError::RetriesExhausted {
                command: pending.command,
                destination: pending.destination,
                retries: self.config.n_retries,
                last_result: pending.last_device_result(),
                reasons: pending.retry_reasons.clone(),
            }
        }
    }

    fn fail_all(&mut self, error: ScpError) {
        for pending in self.pending.drain_all() {
            pending.fail(error.clone());
        }
        self.update_throttle();
    }

    /// removes a request from the table, freeing its sequence number and window slot
    fn retire(&mut self, sequence: u16) -> Option<PendingRequest> {
        let result = self.pending.remove(sequence);
        self.update_throttle();
        result
    }

    fn update_throttle(&mut self) {
        let in_progress = self.pending.len();
        if self.window.is_saturated(in_progress) {
            self.throttled = true;
        }
        else if in_progress <= self.window.resume_threshold() {
            self.throttled = false;
        }
    }
}
