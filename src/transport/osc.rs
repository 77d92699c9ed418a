// Minimal OSC 1.0 codec - messages with float/int/string arguments
// Only the subset the host control surface actually speaks: no bundles on
// the send side, bundles on receive are rejected and dropped by the caller

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OscError {
    #[error("Packet too short ({0} bytes)")]
    Truncated(usize),

    #[error("OSC bundles are not supported")]
    UnsupportedBundle,

    #[error("Address must start with '/': {0}")]
    BadAddress(String),

    #[error("Missing type tag string")]
    MissingTypeTags,

    #[error("Unsupported type tag '{0}'")]
    UnsupportedTag(char),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// A single OSC argument; the control surface only uses these three
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Float(f32),
    Int(i32),
    Str(String),
}

/// An OSC message: an address pattern plus typed arguments
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>, args: Vec<OscArg>) -> Self {
        OscMessage {
            addr: addr.into(),
            args,
        }
    }

    /// Shorthand for the common single-float message
    pub fn float(addr: impl Into<String>, value: f32) -> Self {
        OscMessage::new(addr, vec![OscArg::Float(value)])
    }

    /// First argument as f32, accepting int promotion
    pub fn arg_as_f32(&self) -> Option<f32> {
        match self.args.first() {
            Some(OscArg::Float(f)) => Some(*f),
            Some(OscArg::Int(i)) => Some(*i as f32),
            _ => None,
        }
    }

    /// First argument as a string slice
    pub fn arg_as_str(&self) -> Option<&str> {
        match self.args.first() {
            Some(OscArg::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Serialize to the OSC wire format (big-endian, 4-byte aligned)
    pub fn encode(&self) -> Result<Vec<u8>, OscError> {
        if !self.addr.starts_with('/') {
            return Err(OscError::BadAddress(self.addr.clone()));
        }

        let mut out = Vec::with_capacity(64);
        write_padded_str(&mut out, &self.addr);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(match arg {
                OscArg::Float(_) => 'f',
                OscArg::Int(_) => 'i',
                OscArg::Str(_) => 's',
            });
        }
        write_padded_str(&mut out, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Float(f) => out.extend_from_slice(&f.to_be_bytes()),
                OscArg::Int(i) => out.extend_from_slice(&i.to_be_bytes()),
                OscArg::Str(s) => write_padded_str(&mut out, s),
            }
        }

        Ok(out)
    }

    /// Parse one message from a datagram
    pub fn decode(data: &[u8]) -> Result<OscMessage, OscError> {
        if data.len() < 4 {
            return Err(OscError::Truncated(data.len()));
        }
        if data.starts_with(b"#bundle") {
            return Err(OscError::UnsupportedBundle);
        }

        let mut offset = 0;
        let addr = read_padded_str(data, &mut offset)?;
        if !addr.starts_with('/') {
            return Err(OscError::BadAddress(addr));
        }

        // A bare address with no type tags is legal OSC 1.0; treat as no args
        if offset >= data.len() {
            return Ok(OscMessage::new(addr, Vec::new()));
        }

        let tags = read_padded_str(data, &mut offset)?;
        if !tags.starts_with(',') {
            return Err(OscError::MissingTypeTags);
        }

        let mut args = Vec::with_capacity(tags.len() - 1);
        for tag in tags.chars().skip(1) {
            match tag {
                'f' => {
                    let bytes = take(data, &mut offset, 4)?;
                    args.push(OscArg::Float(f32::from_be_bytes([
                        bytes[0], bytes[1], bytes[2], bytes[3],
                    ])));
                }
                'i' => {
                    let bytes = take(data, &mut offset, 4)?;
                    args.push(OscArg::Int(i32::from_be_bytes([
                        bytes[0], bytes[1], bytes[2], bytes[3],
                    ])));
                }
                's' => {
                    let s = read_padded_str(data, &mut offset)?;
                    args.push(OscArg::Str(s));
                }
                other => return Err(OscError::UnsupportedTag(other)),
            }
        }

        Ok(OscMessage::new(addr, args))
    }
}

/// Append a null-terminated string padded to a 4-byte boundary
fn write_padded_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    let padding = 4 - (s.len() % 4);
    out.extend(std::iter::repeat(0u8).take(padding));
}

/// Read a null-terminated, 4-byte padded string at *offset
/// A short final string leaves *offset past the end of the packet; the
/// next read must see that as truncation, not a panic
fn read_padded_str(data: &[u8], offset: &mut usize) -> Result<String, OscError> {
    let rest = data
        .get(*offset..)
        .ok_or(OscError::Truncated(data.len()))?;
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::Truncated(data.len()))?;

    let s = std::str::from_utf8(&rest[..end])
        .map_err(|_| OscError::InvalidUtf8)?
        .to_string();

    // Consume the string, its terminator, and the padding
    let consumed = end + 1;
    *offset += consumed + (4 - consumed % 4) % 4;
    Ok(s)
}

/// Take `count` bytes at *offset, advancing it
fn take<'a>(data: &'a [u8], offset: &mut usize, count: usize) -> Result<&'a [u8], OscError> {
    if *offset + count > data.len() {
        return Err(OscError::Truncated(data.len()));
    }
    let slice = &data[*offset..*offset + count];
    *offset += count;
    Ok(slice)
}
