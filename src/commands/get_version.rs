use crate::commands::Command;
use crate::error::ScpError;
use crate::wire::byte_order::{read_u16_le, read_u32_le, read_u8};
use crate::wire::{ScpCommand, ScpRequest, ScpResponse, SdpFlag, SdpHeader};

/// Asks a processor for the version of the software it runs
#[derive(Debug, Clone, Copy)]
pub struct GetVersion {
    pub x: u8,
    pub y: u8,
    pub cpu: u8,
}

impl Command for GetVersion {
    type Response = VersionInfo;

    fn request(&self) -> ScpRequest {
        ScpRequest::new(SdpHeader::for_host_request(SdpFlag::ReplyExpected, 0, self.x, self.y, self.cpu), ScpCommand::Ver)
    }

    fn parse_response(&self, response: ScpResponse) -> Result<VersionInfo, ScpError> {
        VersionInfo::deser(&response.payload)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VersionInfo {
    pub p: u8,
    pub physical_cpu_id: u8,
    pub x: u8,
    pub y: u8,
    pub version_number: (u32, u32, u32),
    /// seconds since the epoch
    pub build_date: u32,
    pub name: String,
    pub hardware: String,
    pub version_string: String,
}

impl VersionInfo {
    const FIXED_LEN: usize = 12;
    /// marks the format that carries a full "major.minor.patch" string after the name
    const EXTENDED_VERSION_MARKER: u16 = 0xFFFF;

    /// ```ascii
    /// 0: p (u8)
    /// 1: physical cpu id (u8)
    /// 2: y (u8)
    /// 3: x (u8)
    /// 4: (unused u16)
    /// 6: version number (u16 LE)
    /// 8: build date (u32 LE)
    /// 12: "name/hardware" [ \0 "major.minor.patch" ] \0
    /// ```
    pub fn deser(buf: &[u8]) -> Result<VersionInfo, ScpError> {
        let p = read_u8(buf, 0)?;
        let physical_cpu_id = read_u8(buf, 1)?;
        let y = read_u8(buf, 2)?;
        let x = read_u8(buf, 3)?;
        let version_no = read_u16_le(buf, 6)?;
        let build_date = read_u32_le(buf, 8)?;

        let text = &buf[Self::FIXED_LEN..];
        let text = text.strip_suffix(&[0]).unwrap_or(text);
        let text = std::str::from_utf8(text)
            .map_err(|e| ScpError::MalformedPacket(format!("version string is not UTF-8: {}", e)))?;

        let (name_hardware, version_number, version_string) = if version_no < Self::EXTENDED_VERSION_MARKER {
            let version_no = version_no as u32;
            (text, (version_no / 100, version_no % 100, 0), text.to_string())
        }
        else {
            let (name_hardware, version) = text.split_once('\0')
                .unwrap_or((text, ""));
            let version = version.trim_matches('\0');
            (name_hardware.trim_end_matches('\0'), Self::parse_version(version)?, version.to_string())
        };

        let (name, hardware) = name_hardware.split_once('/')
            .ok_or_else(|| ScpError::MalformedPacket(format!("expected 'name/hardware', was {:?}", name_hardware)))?;

        Ok(VersionInfo {
            p,
            physical_cpu_id,
            x,
            y,
            version_number,
            build_date,
            name: name.to_string(),
            hardware: hardware.to_string(),
            version_string,
        })
    }

    /// parses a leading "major.minor.patch", ignoring anything after the patch number's digits
    fn parse_version(version: &str) -> Result<(u32, u32, u32), ScpError> {
        let malformed = || ScpError::MalformedPacket(format!("can not parse version {:?}", version));

        let mut parts = version.splitn(3, '.');
        let mut next_number = |all_digits: bool| -> Result<u32, ScpError> {
            let part = parts.next().ok_or_else(malformed)?;
            let digits_len = part.find(|c: char| !c.is_ascii_digit()).unwrap_or(part.len());
            if digits_len == 0 || (all_digits && digits_len != part.len()) {
                return Err(malformed());
            }
            part[..digits_len].parse().map_err(|_| malformed())
        };

        Ok((next_number(true)?, next_number(true)?, next_number(false)?))
    }
}
