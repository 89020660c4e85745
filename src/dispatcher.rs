use std::sync::{Arc, Mutex};

use anyhow::bail;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::commands::{into_completion, Command};
use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::error::ScpError;
use crate::pending::Completion;
use crate::selector::{ConnectionSelector, RoundRobinSelector};
use crate::transport::TransportStats;
use crate::worker::TransportHandle;
use crate::wire::ScpRequest;

/// Spreads requests over several connections to the same machine, each with its own transport
///  worker. Requests sent through a dispatcher form batches: `join` waits for everything sent
///  since the previous `join` and reports the errors that were not handled by the caller.
///
/// A dispatcher can be shared between tasks. Completions on different connections are not
///  ordered relative to each other.
pub struct MultiConnectionDispatcher {
    transports: Vec<TransportHandle>,
    selector: Mutex<Box<dyn ConnectionSelector>>,
    /// indices of the transports that received requests since the last `join`
    touched: Mutex<FxHashSet<usize>>,
    errors: Arc<Mutex<Vec<ScpError>>>,
}

impl MultiConnectionDispatcher {
    pub fn new(connections: Vec<Arc<dyn Connection>>, selector: Box<dyn ConnectionSelector>, config: TransportConfig) -> anyhow::Result<MultiConnectionDispatcher> {
        config.validate()?;
        if connections.is_empty() {
            bail!("a dispatcher requires at least one connection");
        }

        let config = Arc::new(config);
        let transports = connections.into_iter()
            .enumerate()
            .map(|(idx, connection)| TransportHandle::spawn(idx, connection, config.clone()))
            .collect::<Vec<_>>();
        info!("started dispatcher with {} connections, selecting with {:?}", transports.len(), selector);

        Ok(MultiConnectionDispatcher {
            transports,
            selector: Mutex::new(selector),
            touched: Default::default(),
            errors: Default::default(),
        })
    }

    pub fn with_round_robin(connections: Vec<Arc<dyn Connection>>, config: TransportConfig) -> anyhow::Result<MultiConnectionDispatcher> {
        let selector = RoundRobinSelector::new(connections.len())?;
        Self::new(connections, Box::new(selector), config)
    }

    pub fn num_connections(&self) -> usize {
        self.transports.len()
    }

    /// Sends a command, calling `on_success` with its response. Errors are collected and
    ///  reported by the next `join`.
    pub async fn send<C: Command>(&self, command: C, on_success: impl FnOnce(C::Response) + Send + 'static) -> Result<(), ScpError> {
        let errors = self.errors.clone();
        self.send_with_error_handler(command, on_success, move |e| {
            lock(&errors).push(e);
        }).await
    }

    /// Sends a command, handling errors in `on_error` rather than reporting them from `join`
    pub async fn send_with_error_handler<C: Command>(
        &self,
        command: C,
        on_success: impl FnOnce(C::Response) + Send + 'static,
        on_error: impl FnOnce(ScpError) + Send + 'static,
    ) -> Result<(), ScpError> {
        let (request, completion) = into_completion(command, on_success, on_error);
        self.send_request(request, completion).await
    }

    /// Selects a connection for a request and hands it to that connection's transport.
    ///
    /// Returns an error only if the selected connection can not carry the request. This
    ///  happens before the request is sent, and `completion` is not called.
    pub async fn send_request(&self, request: ScpRequest, completion: Completion) -> Result<(), ScpError> {
        let idx = lock(&self.selector).select(&request);
        let transport = match self.transports.get(idx) {
            Some(transport) => transport,
            None => return Err(ScpError::UnsupportedOperation(format!(
                "selector chose connection {} but there are only {}", idx, self.transports.len()
            ))),
        };

        transport.send(request, completion).await?;
        lock(&self.touched).insert(idx);
        Ok(())
    }

    /// Waits until every request sent since the last `join` is completed, and returns the
    ///  collected error. If several requests failed, the error is `Grouped` with all of them.
    ///  A transport worker that terminated is reported as a failure as well.
    pub async fn join(&self) -> Result<(), ScpError> {
        let touched = std::mem::take(&mut *lock(&self.touched));
        debug!("joining {} transports", touched.len());

        let mut flush_errors = Vec::new();
        for idx in touched {
            if let Err(e) = self.transports[idx].flush().await {
                flush_errors.push(e);
            }
        }

        let mut errors = std::mem::take(&mut *lock(&self.errors));
        errors.append(&mut flush_errors);
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            count => {
                warn!("{} requests failed since the last join", count);
                Err(ScpError::Grouped { errors })
            }
        }
    }

    /// Completes all outstanding requests and stops the transport workers, returning their
    ///  statistics in connection order. Errors that were not reported by a `join` are
    ///  dropped.
    pub async fn shutdown(self) -> Vec<TransportStats> {
        let mut result = Vec::with_capacity(self.transports.len());
        for transport in self.transports {
            result.push(transport.shutdown().await);
        }

        let unreported = lock(&self.errors).len();
        if unreported > 0 {
            warn!("shutting down with {} unreported request errors", unreported);
        }
        result
    }
}

/// a panic in a callback must not take the dispatcher down with it
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock()
        .unwrap_or_else(|e| e.into_inner())
}
