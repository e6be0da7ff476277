use std::fmt;

/// Payload shape of one field, taken from the low three bits of its tag.
///
/// Only the four shapes needed to step over a field are modelled; group
/// start/end (3 and 4) and the reserved values are rejected by the scanner.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl From<WireType> for u8 {
    fn from(t: WireType) -> Self {
        t as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Varint => "VARINT",
            WireType::Fixed64 => "FIXED64",
            WireType::LengthDelimited => "LENGTH_DELIMITED",
            WireType::Fixed32 => "FIXED32",
        };
        f.write_str(name)
    }
}

/// Largest field number whose tag still fits in 32 bits.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Compose a field tag: `(field_number << 3) | wire_type`.
///
/// `field_number` must not exceed [`MAX_FIELD_NUMBER`].
#[inline]
pub fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    debug_assert!(field_number <= MAX_FIELD_NUMBER, "field number {field_number} out of range");
    (field_number << 3) | u32::from(u8::from(wire_type))
}

/// The location of one field inside an encoded message.
///
/// `start..end` covers the tag through the end of the payload, so copying
/// that range reproduces the field byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub field_number: u32,
    pub wire_type: WireType,
    /// Offset of the tag.
    pub start: usize,
    /// Offset of the payload. For length-delimited fields this is past the length prefix.
    pub payload_start: usize,
    /// Offset one past the last payload byte.
    pub end: usize,
}

impl FieldSpan {
    /// Byte range of the whole field, tag included.
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Byte range of the payload only.
    #[inline]
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.payload_start..self.end
    }
}
