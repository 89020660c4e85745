use std::sync::Arc;

use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, Instrument, Level};

use crate::config::TransportConfig;
use crate::connection::{Capabilities, Connection};
use crate::error::ScpError;
use crate::pending::{call_completion, Completion};
use crate::transport::{check_supported, TransportStats, WindowedTransport};
use crate::wire::ScpRequest;

pub enum TransportCommand {
    Send {
        request: ScpRequest,
        completion: Completion,
    },
    /// completes all requests in flight, then signals `done`
    Flush {
        done: oneshot::Sender<()>,
    },
}

/// The sending side of a transport worker: a tokio task that owns a [WindowedTransport] and
///  its connection, and is fed requests through a bounded channel. The worker stops accepting
///  requests while its window is full, so a transport that falls behind makes callers wait.
pub struct TransportHandle {
    index: usize,
    capabilities: Capabilities,
    commands: mpsc::Sender<TransportCommand>,
    join_handle: JoinHandle<TransportStats>,
}

impl TransportHandle {
    pub fn spawn(index: usize, connection: Arc<dyn Connection>, config: Arc<TransportConfig>) -> TransportHandle {
        let capabilities = connection.capabilities();
        let (send, recv) = mpsc::channel(config.command_queue_depth);
        let transport = WindowedTransport::new(connection, config);

        let span = span!(Level::INFO, "transport", connection = index);
        let join_handle = tokio::spawn(run_worker(transport, recv).instrument(span));

        TransportHandle {
            index,
            capabilities,
            commands: send,
            join_handle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Hands a request to the worker, waiting for room in the worker's channel. Requests the
    ///  connection can not carry are rejected right away without calling `completion`.
    pub async fn send(&self, request: ScpRequest, completion: Completion) -> Result<(), ScpError> {
        check_supported(self.capabilities, &request)?;

        if let Err(mpsc::error::SendError(command)) = self.commands.send(TransportCommand::Send { request, completion }).await {
            error!("transport worker {} is gone", self.index);
            if let TransportCommand::Send { completion, .. } = command {
                completion(Err(worker_gone()));
            }
        }
        Ok(())
    }

    /// Waits until every request sent through this handle so far is completed. Fails if the
    ///  worker terminated, because requests may then have been lost without completing.
    pub async fn flush(&self) -> Result<(), ScpError> {
        let (done_send, done_recv) = oneshot::channel();
        if self.commands.send(TransportCommand::Flush { done: done_send }).await.is_err() {
            error!("transport worker {} is gone", self.index);
            return Err(worker_gone());
        }
        done_recv.await.map_err(|_| {
            error!("transport worker {} terminated while flushing", self.index);
            worker_gone()
        })
    }

    /// Stops the worker after it completed all outstanding requests
    pub async fn shutdown(self) -> TransportStats {
        drop(self.commands);
        match self.join_handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("transport worker {} terminated abnormally: {}", self.index, e);
                TransportStats::default()
            }
        }
    }
}

fn worker_gone() -> ScpError {
    ScpError::io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "transport worker terminated"))
}

async fn run_worker(mut transport: WindowedTransport, mut commands: mpsc::Receiver<TransportCommand>) -> TransportStats {
    info!("starting transport worker");
    let connection = transport.connection().clone();

    loop {
        let receive_timeout = transport.next_receive_timeout();

        select! {
            biased;
            received = connection.receive(receive_timeout.unwrap_or_default()), if receive_timeout.is_some() => {
                transport.on_receive_result(received).await;
            }
            opt_command = commands.recv(), if !transport.is_throttled() => {
                match opt_command {
                    Some(TransportCommand::Send { request, completion }) => {
                        // re-checked here because the transport drops rejected completions
                        match check_supported(connection.capabilities(), &request) {
                            Ok(()) => {
                                if let Err(e) = transport.enqueue_request(request, completion).await {
                                    error!("this is a bug: request was rejected after passing checks: {}", e);
                                }
                            }
                            Err(e) => call_completion(completion, Err(e), || format!("rejected {:?} request", request.command)),
                        }
                    }
                    Some(TransportCommand::Flush { done }) => {
                        trace!("flushing");
                        transport.finish().await;
                        let _ = done.send(());
                    }
                    None => {
                        debug!("command channel closed");
                        break;
                    }
                }
            }
        }
    }

    transport.finish().await;
    let stats = transport.stats();
    info!("transport worker stopped: {:?}", stats);
    stats
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::TimeoutKind;
    use crate::wire::ScpResponse;
    use crate::test_util::{read_request, CompletionLog, Reply, SimulatedDevice};
    use crate::window::{Window, WindowSizing};

    fn config() -> Arc<TransportConfig> {
        Arc::new(TransportConfig {
            window: WindowSizing::Fixed(Window::with_channels(12)),
            n_retries: 2,
            command_queue_depth: 4,
            ..TransportConfig::default_config()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_flush() {
        let device = Arc::new(SimulatedDevice::new(|_, index, _| Some(Reply::ok().after(Duration::from_millis(index as u64 % 7)))));
        let handle = TransportHandle::spawn(3, device.clone(), config());
        assert_eq!(handle.index(), 3);
        let log = CompletionLog::new();

        for i in 0..50 {
            handle.send(read_request(0, 0), log.completion(i)).await.unwrap();
        }
        handle.flush().await.unwrap();
        assert_eq!(log.len(), 50);
        assert!(log.outcomes().iter().all(|(_, r)| r.is_ok()));

        // the worker is still usable after a flush
        handle.send(read_request(0, 0), log.completion(50)).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(log.len(), 51);

        let stats = handle.shutdown().await;
        assert_eq!(stats.channels, Some(12));
        assert_eq!(stats.n_resent, 0);
        assert_eq!(device.num_received(), 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_outstanding() {
        let device = Arc::new(SimulatedDevice::new(|_, _, attempt| {
            if attempt == 1 {
                None
            }
            else {
                Some(Reply::ok())
            }
        }));
        let handle = TransportHandle::spawn(0, device.clone(), config());
        let log = CompletionLog::new();

        for i in 0..5 {
            handle.send(read_request(0, 0), log.completion(i)).await.unwrap();
        }
        let stats = handle.shutdown().await;

        assert_eq!(log.len(), 5);
        assert!(log.outcomes().iter().all(|(_, r)| r.is_ok()));
        assert_eq!(stats.n_resent, 5);
        assert!(stats.n_timeouts >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_in_worker() {
        let device = Arc::new(SimulatedDevice::silent());
        let handle = TransportHandle::spawn(0, device.clone(), config());
        let log = CompletionLog::new();

        handle.send(read_request(0, 0), log.completion(0)).await.unwrap();
        handle.flush().await.unwrap();

        assert_eq!(device.attempts_of(0), 3);
        assert!(matches!(log.outcomes()[0].1, Err(ScpError::Timeout { retries: 2, kind: TimeoutKind::RetriesUsedUp, .. })));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_rejected_synchronously() {
        let device = Arc::new(SimulatedDevice::answering_ok().with_capabilities(Capabilities::BOOT));
        let handle = TransportHandle::spawn(0, device.clone(), config());
        assert_eq!(handle.capabilities(), Capabilities::BOOT);
        let log = CompletionLog::new();

        let result = handle.send(read_request(0, 0), log.completion(0)).await;
        assert!(matches!(result, Err(ScpError::UnsupportedOperation(_))));
        handle.flush().await.unwrap();
        assert_eq!(log.len(), 0);
        assert_eq!(device.num_received(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_limits_requests_in_flight() {
        // nothing is answered before the first resend, so everything sent stays in flight
        let device = Arc::new(SimulatedDevice::new(|_, _, attempt| if attempt > 1 { Some(Reply::ok()) } else { None }));
        let handle = TransportHandle::spawn(0, device.clone(), config());
        let log = CompletionLog::new();

        let sender = tokio::spawn({
            let log = log.clone();
            async move {
                for i in 0..30 {
                    handle.send(read_request(0, 0), log.completion(i)).await.unwrap();
                }
                handle
            }
        });

        // let the worker fill its window while the device stays silent
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(device.num_received(), 12);
        assert_eq!(log.len(), 0);

        let handle = sender.await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(log.len(), 30);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_completion_does_not_stop_worker() {
        let device = Arc::new(SimulatedDevice::new(|request, _, _| {
            if request.sdp_header.dest_x == 1 {
                None
            }
            else {
                Some(Reply::ok())
            }
        }));
        let handle = TransportHandle::spawn(0, device.clone(), config());
        let log = CompletionLog::new();

        handle.send(read_request(1, 0), log.completion(0)).await.unwrap();
        handle.send(read_request(0, 0), Box::new(|_: Result<ScpResponse, ScpError>| panic!("broken callback"))).await.unwrap();
        handle.send(read_request(0, 0), log.completion(2)).await.unwrap();
        handle.flush().await.unwrap();

        let outcomes = log.outcomes();
        assert_eq!(log.ids(), vec![2, 0]);
        assert!(outcomes[0].1.is_ok());
        assert!(matches!(outcomes[1].1, Err(ScpError::Timeout { .. })));

        let stats = handle.shutdown().await;
        assert_eq!(stats.n_resent, 2);
    }

    #[tokio::test]
    async fn test_flush_fails_when_worker_is_gone() {
        let device = Arc::new(SimulatedDevice::answering_ok());
        let mut handle = TransportHandle::spawn(0, device, config());
        handle.join_handle.abort();
        let _ = (&mut handle.join_handle).await;

        assert!(matches!(handle.flush().await, Err(ScpError::IoFailure(_))));
    }
}
