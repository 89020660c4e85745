//! Typed commands on top of the generic request / response envelope. Only a representative
//!  subset of the device's command catalogue lives here; further commands plug in by
//!  implementing [Command].

mod get_version;
mod memory;

pub use get_version::{GetVersion, VersionInfo};
pub use memory::{ReadMemory, TransferUnit, WriteMemory};

use std::panic::{self, AssertUnwindSafe};

use crate::error::{panic_message, ScpError};
use crate::pending::Completion;
use crate::wire::{ScpRequest, ScpResponse};

/// A request together with the knowledge of how to interpret its response.
///
/// NB: `parse_response` is only called for responses with result `Ok` - the transport turns all
///      other results into errors (or retries) before the response reaches the command
pub trait Command: Send + 'static {
    type Response: Send + 'static;

    fn request(&self) -> ScpRequest;

    fn parse_response(&self, response: ScpResponse) -> Result<Self::Response, ScpError>;
}

/// Raw requests can be sent as they are, handing the undecoded response to the caller
impl Command for ScpRequest {
    type Response = ScpResponse;

    fn request(&self) -> ScpRequest {
        self.clone()
    }

    fn parse_response(&self, response: ScpResponse) -> Result<ScpResponse, ScpError> {
        Ok(response)
    }
}

/// Splits a command into the request to send and a type-erased completion that decodes the
///  response and calls exactly one of the two callbacks. If `on_success` panics, the panic is
///  reported to `on_error` instead.
pub fn into_completion<C: Command>(
    command: C,
    on_success: impl FnOnce(C::Response) + Send + 'static,
    on_error: impl FnOnce(ScpError) + Send + 'static,
) -> (ScpRequest, Completion) {
    let request = command.request();
    let scp_command = request.command;
    let destination = request.sdp_header.destination();

    let completion: Completion = Box::new(move |result| {
        let response = match result.and_then(|response| command.parse_response(response)) {
            Ok(response) => response,
            Err(e) => return on_error(e),
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || on_success(response))) {
            on_error(ScpError::CallbackPanicked {
                command: scp_command,
                destination,
                message: panic_message(payload.as_ref()),
            });
        }
    });
    (request, completion)
}
