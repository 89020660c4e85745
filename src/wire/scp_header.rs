use bytes::BufMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::ScpError;
use crate::wire::byte_order::{put_u16_le, read_u16_le};

/// Command opcodes understood by the device's monitor processor
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ScpCommand {
    Ver = 0,
    Run = 1,
    Read = 2,
    Write = 3,
    Aplx = 4,
    Fill = 5,
    Count = 15,
    Remap = 16,
    LinkRead = 17,
    LinkWrite = 18,
    Ar = 19,
    Nnp = 20,
    AppCopyRun = 21,
    Sig = 22,
    Ffd = 23,
    As = 24,
    Led = 25,
    Iptag = 26,
    Srom = 27,
    Alloc = 28,
    Rtr = 29,
    Dpri = 30,
    Info = 31,
    Sync = 32,
    BmpInfo = 48,
    FlashCopy = 49,
    FlashErase = 50,
    FlashWrite = 51,
    Reset = 55,
    BmpPower = 57,
    Tube = 64,
}

/// Result codes reported by the device in a response
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ScpResult {
    Ok = 0x80,
    /// bad packet length
    Len = 0x81,
    /// bad checksum
    Sum = 0x82,
    /// bad / invalid command
    Cmd = 0x83,
    /// invalid arguments
    Arg = 0x84,
    /// bad port number
    Port = 0x85,
    Timeout = 0x86,
    /// no P2P route
    Route = 0x87,
    /// bad cpu number
    Cpu = 0x88,
    /// destination dead
    Dead = 0x89,
    /// no free shared memory buffers
    Buf = 0x8a,
    /// no reply to open
    P2pNoReply = 0x8b,
    /// open rejected
    P2pReject = 0x8c,
    /// destination busy
    P2pBusy = 0x8d,
    /// destination did not respond
    P2pTimeout = 0x8e,
    /// packet transmission failed
    PktTx = 0x8f,
}

/// ```ascii
/// 0: command (u16 LE)
/// 2: sequence number (u16 LE)
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScpRequestHeader {
    pub command: ScpCommand,
    pub sequence: u16,
}
impl ScpRequestHeader {
    pub const SERIALIZED_LEN: usize = 4;
    /// offset of the sequence number inside the header
    pub const SEQUENCE_OFFSET: usize = 2;

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_u16_le(buf, self.command.into());
        put_u16_le(buf, self.sequence);
    }

    pub fn deser(buf: &[u8], offset: usize) -> Result<ScpRequestHeader, ScpError> {
        let raw_command = read_u16_le(buf, offset)?;
        let command = ScpCommand::try_from(raw_command)
            .map_err(|_| ScpError::MalformedPacket(format!("unknown command {}", raw_command)))?;
        Ok(ScpRequestHeader {
            command,
            sequence: read_u16_le(buf, offset + Self::SEQUENCE_OFFSET)?,
        })
    }
}

/// ```ascii
/// 0: result (u16 LE)
/// 2: sequence number (u16 LE)
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScpResponseHeader {
    pub result: ScpResult,
    pub sequence: u16,
}
impl ScpResponseHeader {
    pub const SERIALIZED_LEN: usize = 4;
    pub const SEQUENCE_OFFSET: usize = 2;

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_u16_le(buf, self.result.into());
        put_u16_le(buf, self.sequence);
    }

    pub fn deser(buf: &[u8], offset: usize) -> Result<ScpResponseHeader, ScpError> {
        let sequence = Self::deser_sequence(buf, offset)?;
        let raw_result = read_u16_le(buf, offset)?;
        let result = ScpResult::try_from(raw_result)
            .map_err(|_| ScpError::MalformedPacket(format!("unknown result code {:#06x}", raw_result)))?;
        Ok(ScpResponseHeader {
            result,
            sequence,
        })
    }

    /// Reads only the sequence number. This allows attributing a response to its request even
    ///  if the rest of the header turns out to be invalid.
    pub fn deser_sequence(buf: &[u8], offset: usize) -> Result<u16, ScpError> {
        read_u16_le(buf, offset + Self::SEQUENCE_OFFSET)
    }
}
