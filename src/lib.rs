//! Reliable, windowed delivery of commands to a board's monitor processor over UDP.
//!
//! The board answers every command with a response carrying the command's sequence number,
//!  but UDP gives no delivery guarantees, and a busy board drops packets or answers with
//!  'try again' result codes. This crate takes care of that:
//!
//! * Each connection is driven by a [transport::WindowedTransport] that numbers requests,
//!   keeps track of them until a response arrives, and resends them on timeouts or retryable
//!   results.
//!   * A request that is answered with a retryable result within the packet timeout is resent
//!     after a short pause without using up a retry. Timeouts (and retryable results after
//!     the packet timeout) use up one retry each, and a request without retries left fails.
//!   * When a receive times out, *all* overdue requests are resent, not just the oldest one
//!   * The number of requests in flight is bounded by a window. Unless the window is
//!      configured explicitly, it is sized the first time the board is found to have a
//!      response waiting, based on the number of requests in flight at that point.
//! * Sequence numbers are scoped to a transport and never reused while a request is in flight
//! * Problems with a single request are reported to that request's completion callback and
//!   never affect other requests. That includes callbacks that panic.
//! * A [dispatcher::MultiConnectionDispatcher] spreads requests over several connections to the
//!   same machine, each transport running in its own tokio task. `join` waits for a batch of
//!   requests and reports the errors that occurred.
//! * [sync_facade::SyncRequestFacade] turns the callback style into plain request / response
//!
//! ## Wire format
//!
//! UDP payload of a request - all numbers little endian unless noted otherwise:
//! ```ascii
//!  0: padding, always 0 (2 bytes)
//!  2: SDP header:
//!     2: flags (u8) - 0x87 / 0xA7 if a reply is expected, 0x07 / 0x27 if not
//!     3: tag (u8)
//!     4: destination port (3 bits) and cpu (5 bits)
//!     5: source port (3 bits) and cpu (5 bits) - always port 7, cpu 31 for the host
//!     6: destination y (u8)
//!     7: destination x (u8)
//!     8: source y (u8)
//!     9: source x (u8)
//! 10: SCP header:
//!    10: command (u16)
//!    12: sequence number (u16)
//! 14: arguments: 3 x u32, 0 if absent
//! 26: data (0 to 256 bytes)
//! ```
//!
//! A response has the same layout up to offset 10. The SCP header carries the result code in
//!  place of the command, and the response payload starts at offset 14.

pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pending;
pub mod selector;
pub mod sequence;
pub mod sync_facade;
pub mod transport;
pub mod window;
pub mod wire;
pub mod worker;

#[cfg(test)]
mod test_util;

pub use config::{TransportConfig, SCAMP_PORT};
pub use connection::{Capabilities, Connection, ConnectionError, UdpConnection};
pub use dispatcher::MultiConnectionDispatcher;
pub use error::{RetryReason, ScpError, TimeoutKind};
pub use sync_facade::SyncRequestFacade;
pub use transport::{TransportStats, WindowedTransport};
