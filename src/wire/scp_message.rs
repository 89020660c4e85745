use bytes::{BufMut, Bytes, BytesMut};

use crate::connection::Capabilities;
use crate::error::ScpError;
use crate::wire::byte_order::{put_u32_le, read_u32_le};
use crate::wire::scp_header::{ScpCommand, ScpRequestHeader, ScpResponseHeader};
use crate::wire::sdp_header::SdpHeader;

/// number of always-zero bytes in front of the SDP header in a UDP datagram
pub const UDP_PADDING_LEN: usize = 2;
pub const SCP_HEADER_OFFSET: usize = UDP_PADDING_LEN + SdpHeader::SERIALIZED_LEN;
pub const ARGUMENTS_OFFSET: usize = SCP_HEADER_OFFSET + ScpRequestHeader::SERIALIZED_LEN;
pub const NUM_ARGUMENTS: usize = 3;
pub const REQUEST_DATA_OFFSET: usize = ARGUMENTS_OFFSET + NUM_ARGUMENTS * size_of::<u32>();
pub const RESPONSE_PAYLOAD_OFFSET: usize = SCP_HEADER_OFFSET + ScpResponseHeader::SERIALIZED_LEN;

/// A command ready to be sent, except for its sequence number which is assigned by the
///  transport that ends up sending it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScpRequest {
    pub sdp_header: SdpHeader,
    pub command: ScpCommand,
    /// missing arguments are sent as 0
    pub arguments: [Option<u32>; NUM_ARGUMENTS],
    pub data: Bytes,
    /// what a connection must support to carry this request
    pub required_capabilities: Capabilities,
}

impl ScpRequest {
    pub const MAX_DATA_LEN: usize = 256;

    pub fn new(sdp_header: SdpHeader, command: ScpCommand) -> ScpRequest {
        ScpRequest {
            sdp_header,
            command,
            arguments: [None; NUM_ARGUMENTS],
            data: Bytes::new(),
            required_capabilities: Capabilities::SCP,
        }
    }

    pub fn with_arguments(mut self, arguments: [Option<u32>; NUM_ARGUMENTS]) -> ScpRequest {
        self.arguments = arguments;
        self
    }

    pub fn with_data(mut self, data: Bytes) -> ScpRequest {
        self.data = data;
        self
    }

    pub fn with_required_capabilities(mut self, required_capabilities: Capabilities) -> ScpRequest {
        self.required_capabilities = required_capabilities;
        self
    }

    pub fn is_reply_expected(&self) -> bool {
        self.sdp_header.flags.is_reply_expected()
    }

    pub fn serialized_len(&self) -> usize {
        REQUEST_DATA_OFFSET + self.data.len()
    }

    /// The full UDP payload for this request with the given sequence number. The source
    ///  fields of the SDP header are overwritten with the host's fixed values.
    pub fn to_datagram(&self, sequence: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        buf.put_bytes(0, UDP_PADDING_LEN);

        let mut sdp_header = self.sdp_header;
        sdp_header.apply_host_source();
        sdp_header.ser(&mut buf);

        ScpRequestHeader {
            command: self.command,
            sequence,
        }.ser(&mut buf);

        for argument in self.arguments {
            put_u32_le(&mut buf, argument.unwrap_or(0));
        }
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Parses a request datagram as the device sees it. Arguments are always present on the
    ///  wire, so they are returned as `Some`.
    pub fn from_datagram(datagram: &[u8]) -> Result<(ScpRequest, u16), ScpError> {
        if datagram.len() < REQUEST_DATA_OFFSET {
            return Err(ScpError::truncated(REQUEST_DATA_OFFSET, datagram.len()));
        }

        let sdp_header = SdpHeader::deser(datagram, UDP_PADDING_LEN)?;
        let scp_header = ScpRequestHeader::deser(datagram, SCP_HEADER_OFFSET)?;
        let mut arguments = [None; NUM_ARGUMENTS];
        for (i, argument) in arguments.iter_mut().enumerate() {
            *argument = Some(read_u32_le(datagram, ARGUMENTS_OFFSET + i * size_of::<u32>())?);
        }

        let request = ScpRequest {
            sdp_header,
            command: scp_header.command,
            arguments,
            data: Bytes::copy_from_slice(&datagram[REQUEST_DATA_OFFSET..]),
            required_capabilities: Capabilities::SCP,
        };
        Ok((request, scp_header.sequence))
    }
}

/// A decoded response datagram. Interpreting the payload is up to the command that caused the
///  response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScpResponse {
    pub sdp_header: SdpHeader,
    pub header: ScpResponseHeader,
    /// everything after the response header
    pub payload: Bytes,
}

impl ScpResponse {
    pub fn from_datagram(datagram: Bytes) -> Result<ScpResponse, ScpError> {
        if datagram.len() < RESPONSE_PAYLOAD_OFFSET {
            return Err(ScpError::truncated(RESPONSE_PAYLOAD_OFFSET, datagram.len()));
        }

        let sdp_header = SdpHeader::deser(&datagram, UDP_PADDING_LEN)?;
        let header = ScpResponseHeader::deser(&datagram, SCP_HEADER_OFFSET)?;
        Ok(ScpResponse {
            sdp_header,
            header,
            payload: datagram.slice(RESPONSE_PAYLOAD_OFFSET..),
        })
    }

    /// The sequence number of a response datagram, available even if the rest of the datagram
    ///  can not be decoded
    pub fn sequence_of(datagram: &[u8]) -> Result<u16, ScpError> {
        ScpResponseHeader::deser_sequence(datagram, SCP_HEADER_OFFSET)
    }

    pub fn to_datagram(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_PAYLOAD_OFFSET + self.payload.len());
        buf.put_bytes(0, UDP_PADDING_LEN);
        self.sdp_header.ser(&mut buf);
        self.header.ser(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ScpResult, SdpFlag};

    fn read_request() -> ScpRequest {
        ScpRequest::new(SdpHeader::for_host_request(SdpFlag::ReplyExpected, 0, 3, 4, 5), ScpCommand::Read)
            .with_arguments([Some(0x7000_0000), Some(16), None])
    }

    #[test]
    fn test_request_to_datagram() {
        let datagram = read_request().to_datagram(0x0102);
        assert_eq!(datagram.as_ref(), &[
            0, 0,
            0x87, 0xff, 0x05, 0xff, 0x04, 0x03, 0x00, 0x00,
            0x02, 0x00, 0x02, 0x01,
            0x00, 0x00, 0x00, 0x70,
            0x10, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ]);
    }

    #[test]
    fn test_request_datagram_with_data() {
        let request = read_request()
            .with_data(Bytes::from_static(b"abc"));
        let datagram = request.to_datagram(9);
        assert_eq!(datagram.len(), request.serialized_len());
        assert_eq!(&datagram[REQUEST_DATA_OFFSET..], b"abc");

        let (parsed, sequence) = ScpRequest::from_datagram(&datagram).unwrap();
        assert_eq!(sequence, 9);
        assert_eq!(parsed.data, Bytes::from_static(b"abc"));
        assert_eq!(parsed.arguments, [Some(0x7000_0000), Some(16), Some(0)]);
        assert_eq!(parsed.sdp_header, request.sdp_header);
    }

    #[test]
    fn test_source_fields_are_overwritten() {
        let mut request = read_request();
        request.sdp_header.source_x = 9;
        request.sdp_header.source_port = 1;
        let (parsed, _) = ScpRequest::from_datagram(&request.to_datagram(0)).unwrap();
        assert_eq!(parsed.sdp_header.source_x, 0);
        assert_eq!(parsed.sdp_header.source_port, 7);
    }

    #[test]
    fn test_response_from_datagram() {
        let datagram = Bytes::from_static(&[
            0, 0,
            0x07, 0xff, 0xff, 0x05, 0x00, 0x00, 0x04, 0x03,
            0x80, 0x00, 0x34, 0x12,
            1, 2, 3,
        ]);
        let response = ScpResponse::from_datagram(datagram.clone()).unwrap();
        assert_eq!(response.header.result, ScpResult::Ok);
        assert_eq!(response.header.sequence, 0x1234);
        assert_eq!(response.sdp_header.source_cpu, 5);
        assert_eq!(response.sdp_header.source_x, 3);
        assert_eq!(response.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(response.to_datagram(), datagram);
        assert_eq!(ScpResponse::sequence_of(&datagram).unwrap(), 0x1234);
    }

    #[test]
    fn test_truncated_response() {
        let datagram = Bytes::from_static(&[0, 0, 0x07, 0xff, 0xff, 0x05, 0x00, 0x00, 0x04, 0x03, 0x80, 0x00, 0x34]);
        assert!(matches!(ScpResponse::from_datagram(datagram.clone()), Err(ScpError::MalformedPacket(_))));
        assert!(ScpResponse::sequence_of(&datagram).is_err());
    }
}
