use anyhow::bail;
use bytes::Bytes;

use crate::commands::Command;
use crate::error::ScpError;
use crate::wire::{ScpCommand, ScpRequest, ScpResponse, SdpFlag, SdpHeader};

/// The widest access the device can use for a transfer, given its alignment
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum TransferUnit {
    Byte = 0,
    HalfWord = 1,
    Word = 2,
}
impl TransferUnit {
    pub fn for_transfer(base_address: u32, len: usize) -> TransferUnit {
        if base_address % 4 == 0 && len % 4 == 0 {
            TransferUnit::Word
        }
        else if base_address % 2 == 0 && len % 2 == 0 {
            TransferUnit::HalfWord
        }
        else {
            TransferUnit::Byte
        }
    }
}

fn check_len(len: usize) -> anyhow::Result<()> {
    if len == 0 || len > ScpRequest::MAX_DATA_LEN {
        bail!("transfer length must be between 1 and {}, was {}", ScpRequest::MAX_DATA_LEN, len);
    }
    Ok(())
}

/// Reads up to 256 bytes of memory on a chip
#[derive(Debug, Clone)]
pub struct ReadMemory {
    pub x: u8,
    pub y: u8,
    pub cpu: u8,
    pub base_address: u32,
    pub len: usize,
}
impl ReadMemory {
    pub fn new(x: u8, y: u8, cpu: u8, base_address: u32, len: usize) -> anyhow::Result<ReadMemory> {
        check_len(len)?;
        Ok(ReadMemory { x, y, cpu, base_address, len })
    }
}

impl Command for ReadMemory {
    type Response = Bytes;

    fn request(&self) -> ScpRequest {
        ScpRequest::new(SdpHeader::for_host_request(SdpFlag::ReplyExpected, 0, self.x, self.y, self.cpu), ScpCommand::Read)
            .with_arguments([
                Some(self.base_address),
                Some(self.len as u32),
                Some(TransferUnit::for_transfer(self.base_address, self.len) as u32),
            ])
    }

    fn parse_response(&self, response: ScpResponse) -> Result<Bytes, ScpError> {
        if response.payload.len() < self.len {
            return Err(ScpError::MalformedPacket(format!("read of {} bytes returned only {}", self.len, response.payload.len())));
        }
        Ok(response.payload.slice(..self.len))
    }
}

/// Writes up to 256 bytes of memory on a chip
#[derive(Debug, Clone)]
pub struct WriteMemory {
    pub x: u8,
    pub y: u8,
    pub cpu: u8,
    pub base_address: u32,
    pub data: Bytes,
}
impl WriteMemory {
    pub fn new(x: u8, y: u8, cpu: u8, base_address: u32, data: Bytes) -> anyhow::Result<WriteMemory> {
        check_len(data.len())?;
        Ok(WriteMemory { x, y, cpu, base_address, data })
    }
}

impl Command for WriteMemory {
    type Response = ();

    fn request(&self) -> ScpRequest {
        ScpRequest::new(SdpHeader::for_host_request(SdpFlag::ReplyExpected, 0, self.x, self.y, self.cpu), ScpCommand::Write)
            .with_arguments([
                Some(self.base_address),
                Some(self.data.len() as u32),
                Some(TransferUnit::for_transfer(self.base_address, self.data.len()) as u32),
            ])
            .with_data(self.data.clone())
    }

    fn parse_response(&self, _response: ScpResponse) -> Result<(), ScpError> {
        Ok(())
    }
}
