//! Encoding and decoding of the two nested headers: the SDP addressing envelope and the SCP
//!  command / response envelope inside it. Everything in here is a pure transformation on
//!  byte buffers.

pub mod byte_order;
mod scp_header;
mod scp_message;
mod sdp_header;

pub use scp_header::{ScpCommand, ScpRequestHeader, ScpResponseHeader, ScpResult};
pub use scp_message::{
    ScpRequest, ScpResponse, ARGUMENTS_OFFSET, NUM_ARGUMENTS, REQUEST_DATA_OFFSET,
    RESPONSE_PAYLOAD_OFFSET, SCP_HEADER_OFFSET, UDP_PADDING_LEN,
};
pub use sdp_header::{CoreLocation, SdpFlag, SdpHeader};
