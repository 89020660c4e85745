use std::fmt::{Display, Formatter};

use bytes::BufMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::ScpError;
use crate::wire::byte_order::read_u8;

/// Controls whether the device replies to a datagram, and whether it may route it over its
///  point-to-point network.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SdpFlag {
    ReplyNotExpected = 0x07,
    ReplyExpected = 0x87,
    ReplyNotExpectedNoP2p = 0x27,
    ReplyExpectedNoP2p = 0xA7,
}
impl SdpFlag {
    pub fn is_reply_expected(&self) -> bool {
        matches!(self, SdpFlag::ReplyExpected | SdpFlag::ReplyExpectedNoP2p)
    }
}

/// The core a request is addressed to
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CoreLocation {
    pub x: u8,
    pub y: u8,
    pub cpu: u8,
}
impl Display for CoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.cpu)
    }
}

/// The addressing envelope in front of every command and response.
///
/// ```ascii
/// 0: flags (u8)
/// 1: tag (u8)
/// 2: destination port (3 bits) | destination cpu (5 bits)
/// 3: source port (3 bits) | source cpu (5 bits)
/// 4: destination chip y (u8)
/// 5: destination chip x (u8)
/// 6: source chip y (u8)
/// 7: source chip x (u8)
/// ```
///
/// NB: On UDP this header is preceded by two padding bytes, see [crate::wire::UDP_PADDING_LEN]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SdpHeader {
    pub flags: SdpFlag,
    pub tag: u8,
    pub dest_port: u8,
    pub dest_cpu: u8,
    pub dest_x: u8,
    pub dest_y: u8,
    pub source_port: u8,
    pub source_cpu: u8,
    pub source_x: u8,
    pub source_y: u8,
}

impl SdpHeader {
    pub const SERIALIZED_LEN: usize = 8;

    /// the tag value meaning 'no specific reply route', used if a request does not set a tag
    pub const DEFAULT_TAG: u8 = 0xFF;

    /// the device only accepts host traffic that claims to come from this port / cpu / chip
    pub const HOST_SOURCE_PORT: u8 = 7;
    pub const HOST_SOURCE_CPU: u8 = 31;
    pub const HOST_SOURCE_X: u8 = 0;
    pub const HOST_SOURCE_Y: u8 = 0;

    /// A header for a request from this host to the given core, with the default tag and the
    ///  fixed source coordinates the device expects from host traffic.
    pub fn for_host_request(flags: SdpFlag, dest_port: u8, dest_x: u8, dest_y: u8, dest_cpu: u8) -> SdpHeader {
        SdpHeader {
            flags,
            tag: Self::DEFAULT_TAG,
            dest_port,
            dest_cpu,
            dest_x,
            dest_y,
            source_port: Self::HOST_SOURCE_PORT,
            source_cpu: Self::HOST_SOURCE_CPU,
            source_x: Self::HOST_SOURCE_X,
            source_y: Self::HOST_SOURCE_Y,
        }
    }

    pub fn destination(&self) -> CoreLocation {
        CoreLocation {
            x: self.dest_x,
            y: self.dest_y,
            cpu: self.dest_cpu,
        }
    }

    /// Overwrites the source fields with the values the device expects for traffic coming
    ///  from the host
    pub fn apply_host_source(&mut self) {
        self.source_port = Self::HOST_SOURCE_PORT;
        self.source_cpu = Self::HOST_SOURCE_CPU;
        self.source_x = Self::HOST_SOURCE_X;
        self.source_y = Self::HOST_SOURCE_Y;
    }

    fn pack_port_cpu(port: u8, cpu: u8) -> u8 {
        ((port & 0x7) << 5) | (cpu & 0x1F)
    }

    fn unpack_port_cpu(packed: u8) -> (u8, u8) {
        (packed >> 5, packed & 0x1F)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags.into());
        buf.put_u8(self.tag);
        buf.put_u8(Self::pack_port_cpu(self.dest_port, self.dest_cpu));
        buf.put_u8(Self::pack_port_cpu(self.source_port, self.source_cpu));
        buf.put_u8(self.dest_y);
        buf.put_u8(self.dest_x);
        buf.put_u8(self.source_y);
        buf.put_u8(self.source_x);
    }

    pub fn deser(buf: &[u8], offset: usize) -> Result<SdpHeader, ScpError> {
        if buf.len() < offset + Self::SERIALIZED_LEN {
            return Err(ScpError::truncated(offset + Self::SERIALIZED_LEN, buf.len()));
        }

        let raw_flags = read_u8(buf, offset)?;
        let flags = SdpFlag::try_from(raw_flags)
            .map_err(|_| ScpError::MalformedPacket(format!("invalid SDP flags {:#04x}", raw_flags)))?;
        let (dest_port, dest_cpu) = Self::unpack_port_cpu(read_u8(buf, offset + 2)?);
        let (source_port, source_cpu) = Self::unpack_port_cpu(read_u8(buf, offset + 3)?);

        Ok(SdpHeader {
            flags,
            tag: read_u8(buf, offset + 1)?,
            dest_port,
            dest_cpu,
            dest_y: read_u8(buf, offset + 4)?,
            dest_x: read_u8(buf, offset + 5)?,
            source_port,
            source_cpu,
            source_y: read_u8(buf, offset + 6)?,
            source_x: read_u8(buf, offset + 7)?,
        })
    }
}
