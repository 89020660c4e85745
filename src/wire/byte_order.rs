//! Fixed-width integer access at an offset into a byte buffer. Reads are bounds checked and
//!  report a truncated packet instead of panicking; writes go through `BufMut`.

use bytes::BufMut;

use crate::error::ScpError;

fn slice_at<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ScpError> {
    offset.checked_add(N)
        .and_then(|end| buf.get(offset..end))
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ScpError::truncated(offset.saturating_add(N), buf.len()))
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8, ScpError> {
    Ok(slice_at::<1>(buf, offset)?[0])
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16, ScpError> {
    slice_at(buf, offset).map(u16::from_le_bytes)
}

pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16, ScpError> {
    slice_at(buf, offset).map(u16::from_be_bytes)
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32, ScpError> {
    slice_at(buf, offset).map(u32::from_le_bytes)
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> Result<u32, ScpError> {
    slice_at(buf, offset).map(u32::from_be_bytes)
}

pub fn read_u64_le(buf: &[u8], offset: usize) -> Result<u64, ScpError> {
    slice_at(buf, offset).map(u64::from_le_bytes)
}

pub fn read_u64_be(buf: &[u8], offset: usize) -> Result<u64, ScpError> {
    slice_at(buf, offset).map(u64::from_be_bytes)
}

pub fn put_u16_le(buf: &mut impl BufMut, value: u16) {
    buf.put_u16_le(value);
}

pub fn put_u16_be(buf: &mut impl BufMut, value: u16) {
    buf.put_u16(value);
}

pub fn put_u32_le(buf: &mut impl BufMut, value: u32) {
    buf.put_u32_le(value);
}

pub fn put_u32_be(buf: &mut impl BufMut, value: u32) {
    buf.put_u32(value);
}

pub fn put_u64_le(buf: &mut impl BufMut, value: u64) {
    buf.put_u64_le(value);
}

pub fn put_u64_be(buf: &mut impl BufMut, value: u64) {
    buf.put_u64(value);
}
