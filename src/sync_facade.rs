use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;
use tracing::debug;

use crate::commands::Command;
use crate::dispatcher::MultiConnectionDispatcher;
use crate::error::{ScpError, TimeoutKind};
use crate::pending::Completion;

/// Request / response style access for callers that want a single result rather than
///  callbacks
#[derive(Clone)]
pub struct SyncRequestFacade {
    dispatcher: Arc<MultiConnectionDispatcher>,
}

impl SyncRequestFacade {
    pub fn new(dispatcher: Arc<MultiConnectionDispatcher>) -> SyncRequestFacade {
        SyncRequestFacade { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<MultiConnectionDispatcher> {
        &self.dispatcher
    }

    /// Sends a command and waits for its response, but no longer than `timeout`. Running into
    ///  the timeout does not stop the request, it only stops waiting for it, and is reported as
    ///  a `Timeout` of kind [TimeoutKind::CallerGaveUp].
    pub async fn call<C: Command>(&self, command: C, timeout: Duration) -> Result<C::Response, ScpError> {
        let request = command.request();
        let scp_command = request.command;
        let destination = request.sdp_header.destination();

        let (result_send, result_recv) = oneshot::channel();
        let completion: Completion = Box::new(move |result| {
            let _ = result_send.send(result.and_then(|response| command.parse_response(response)));
        });
        self.dispatcher.send_request(request, completion).await?;

        match time::timeout(timeout, result_recv).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ScpError::io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "request was dropped without completing"))),
            Err(_) => {
                debug!("gave up waiting for {:?} after {:?}", scp_command, timeout);
                Err(ScpError::Timeout {
                    command: Some(scp_command),
                    destination,
                    kind: TimeoutKind::CallerGaveUp,
                    retries: 0,
                    packet_timeout: timeout,
                })
            }
        }
    }
}
