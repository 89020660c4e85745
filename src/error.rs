use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionError;
use crate::wire::{CoreLocation, ScpCommand, ScpResult};

/// Why a request was sent again. Recorded per pending request so that exhausted retries can
///  be reported accurately.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryReason {
    Timeout,
    DeviceResult(ScpResult),
}
impl Display for RetryReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::Timeout => write!(f, "timeout"),
            RetryReason::DeviceResult(result) => write!(f, "{:?}", result),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimeoutKind {
    /// the transport resent the request until its retries were used up
    RetriesUsedUp,
    /// a synchronous caller stopped waiting, the request may still be in flight
    CallerGaveUp,
}

/// Everything that can go wrong with a single request. Errors are delivered through the
///  request's error callback, never raised across the transport boundary, so one failing
///  request does not affect others sharing the connection.
///
/// NB: This is `Clone` because a single socket failure is reported to every request that was
///      outstanding on the connection
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScpError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("operation {0} is not supported by the selected connection")]
    UnsupportedOperation(String),

    /// `packet_timeout` is the call's timeout for [TimeoutKind::CallerGaveUp], and `retries`
    ///  is 0 then
    #[error("request {command:?} to core {destination} timed out ({kind:?}) after {retries} retries with a timeout of {packet_timeout:?}")]
    Timeout {
        command: Option<ScpCommand>,
        destination: CoreLocation,
        kind: TimeoutKind,
        retries: u32,
        packet_timeout: Duration,
    },

    #[error("unexpected result {result:?} for command {command:?} to core {destination}")]
    UnexpectedResult {
        command: ScpCommand,
        destination: CoreLocation,
        result: ScpResult,
    },

    #[error("request {command:?} to core {destination} failed after {retries} retries, last device result {last_result:?}, reasons {reasons:?}")]
    RetriesExhausted {
        command: ScpCommand,
        destination: CoreLocation,
        retries: u32,
        last_result: Option<ScpResult>,
        reasons: Vec<RetryReason>,
    },

    #[error("I/O failure: {0}")]
    IoFailure(#[source] Arc<std::io::Error>),

    /// a success callback panicked while handling the response
    #[error("callback for {command:?} to core {destination} panicked: {message}")]
    CallbackPanicked {
        command: ScpCommand,
        destination: CoreLocation,
        message: String,
    },

    /// several requests of a batch failed, in the order their failures were reported
    #[error("{}", describe_grouped(.errors))]
    Grouped {
        errors: Vec<ScpError>,
    },
}

fn describe_grouped(errors: &[ScpError]) -> String {
    match errors.first() {
        Some(first) => format!("{} requests failed, first failure: {}", errors.len(), first),
        None => "no requests failed".to_string(),
    }
}

/// Best effort text for a panic payload, which is a `&str` or a `String` for `panic!` with a
///  message
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    }
    else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    }
    else {
        "<no message>".to_string()
    }
}

impl ScpError {
    pub fn truncated(required: usize, actual: usize) -> ScpError {
        ScpError::MalformedPacket(format!("truncated packet: need {} bytes, got {}", required, actual))
    }

    pub fn io(e: std::io::Error) -> ScpError {
        ScpError::IoFailure(Arc::new(e))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScpError::Timeout { .. })
    }

}

impl From<ConnectionError> for ScpError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Io(e) => ScpError::io(e),
            ConnectionError::Timeout => ScpError::io(std::io::ErrorKind::TimedOut.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination() -> CoreLocation {
        CoreLocation { x: 1, y: 2, cpu: 3 }
    }

    #[test]
    fn test_display() {
        let e = ScpError::truncated(14, 3);
        assert_eq!(e.to_string(), "malformed packet: truncated packet: need 14 bytes, got 3");

        let e = ScpError::UnexpectedResult { command: ScpCommand::Read, destination: destination(), result: ScpResult::Arg };
        assert_eq!(e.to_string(), "unexpected result Arg for command Read to core 1, 2, 3");

        let e = ScpError::Grouped {
            errors: vec![
                ScpError::UnexpectedResult { command: ScpCommand::Read, destination: destination(), result: ScpResult::Arg },
                ScpError::MalformedPacket("x".to_string()),
            ],
        };
        assert_eq!(e.to_string(), "2 requests failed, first failure: unexpected result Arg for command Read to core 1, 2, 3");
    }

    #[test]
    fn test_timeout_display() {
        let e = ScpError::Timeout {
            command: Some(ScpCommand::Ver),
            destination: destination(),
            kind: TimeoutKind::CallerGaveUp,
            retries: 0,
            packet_timeout: Duration::from_secs(2),
        };
        assert!(e.is_timeout());
        assert_eq!(e.to_string(), "request Some(Ver) to core 1, 2, 3 timed out (CallerGaveUp) after 0 retries with a timeout of 2s");
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static text");
        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }

    #[test]
    fn test_retry_reason_display() {
        assert_eq!(RetryReason::Timeout.to_string(), "timeout");
        assert_eq!(RetryReason::DeviceResult(ScpResult::Len).to_string(), "Len");
    }
}
