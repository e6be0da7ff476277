use crate::{
    error::{CodecError, Result},
    types::{FieldSpan, WireType},
};

/// Longest varint accepted for a 32-bit value.
pub const MAX_VARINT32_LEN: usize = 5;

/// Longest varint of any width. Opaque VARINT payloads may carry 64-bit values.
const MAX_VARINT64_LEN: usize = 10;

/// Read a little-endian base-128 varint holding an unsigned 32-bit value.
///
/// Returns the value and the offset just past it.
pub fn read_varint(data: &[u8], offset: usize) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    let mut pos = offset;

    for group in 0..MAX_VARINT32_LEN {
        let Some(&byte) = data.get(pos) else {
            return Err(CodecError::MalformedVarint { offset });
        };
        pos += 1;

        let bits = u32::from(byte & 0x7F);
        // The fifth group only has room for the top four bits.
        if group == MAX_VARINT32_LEN - 1 && bits > 0x0F {
            return Err(CodecError::MalformedVarint { offset });
        }
        value |= bits << (7 * group);

        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
    }

    Err(CodecError::MalformedVarint { offset })
}

/// Step over a varint of any width without decoding it.
fn skip_varint(data: &[u8], offset: usize) -> Result<usize> {
    let mut pos = offset;
    for _ in 0..MAX_VARINT64_LEN {
        let Some(&byte) = data.get(pos) else {
            return Err(CodecError::MalformedVarint { offset });
        };
        pos += 1;
        if byte & 0x80 == 0 {
            return Ok(pos);
        }
    }
    Err(CodecError::MalformedVarint { offset })
}

fn advance(data: &[u8], offset: usize, needed: usize) -> Result<usize> {
    let available = data.len().saturating_sub(offset);
    if needed > available {
        return Err(CodecError::Truncated {
            offset,
            needed,
            available,
        });
    }
    Ok(offset + needed)
}

/// Advance past one field payload starting at `offset`.
///
/// `wire_type` is the raw value derived from the tag (`tag & 7`).
pub fn skip_field(data: &[u8], offset: usize, wire_type: u8) -> Result<usize> {
    let wire_type = WireType::try_from(wire_type)
        .map_err(|()| CodecError::UnknownWireType { wire_type, offset })?;
    skip_payload(data, offset, wire_type)
}

fn skip_payload(data: &[u8], offset: usize, wire_type: WireType) -> Result<usize> {
    match wire_type {
        WireType::Varint => skip_varint(data, offset),
        WireType::Fixed64 => advance(data, offset, 8),
        WireType::LengthDelimited => {
            let (len, content_offset) = read_varint(data, offset)?;
            advance(data, content_offset, len as usize)
        }
        WireType::Fixed32 => advance(data, offset, 4),
    }
}

/// Walks an encoded message one field at a time, yielding exact byte spans.
///
/// The scanner stops after the first error so a caller never sees spans past
/// a point it could not account for.
pub struct FieldScanner<'a> {
    buffer: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> FieldScanner<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            pos: 0,
            failed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read the next field, or `None` at the end of the buffer.
    pub fn next_field(&mut self) -> Result<Option<FieldSpan>> {
        if self.pos >= self.buffer.len() {
            return Ok(None);
        }

        let start = self.pos;
        let (tag, after_tag) = read_varint(self.buffer, start)?;
        let raw_wire_type = (tag & 7) as u8;
        let wire_type = WireType::try_from(raw_wire_type).map_err(|()| {
            CodecError::UnknownWireType {
                wire_type: raw_wire_type,
                offset: after_tag,
            }
        })?;

        let payload_start = match wire_type {
            WireType::LengthDelimited => read_varint(self.buffer, after_tag)?.1,
            _ => after_tag,
        };
        let end = skip_payload(self.buffer, after_tag, wire_type)?;
        self.pos = end;

        Ok(Some(FieldSpan {
            field_number: tag >> 3,
            wire_type,
            start,
            payload_start,
            end,
        }))
    }
}

impl Iterator for FieldScanner<'_> {
    type Item = Result<FieldSpan>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_field() {
            Ok(Some(span)) => Some(Ok(span)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Drop every occurrence of `field_number`, keeping all other fields verbatim and in order.
pub fn remove_field(data: &[u8], field_number: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    for span in FieldScanner::new(data) {
        let span = span?;
        if span.field_number != field_number {
            out.extend_from_slice(&data[span.range()]);
        }
    }
    Ok(out)
}

/// Payload of the last occurrence of `field_number`, if any.
///
/// The whole message is scanned so a malformed tail is still reported.
pub fn find_field(data: &[u8], field_number: u32) -> Result<Option<FieldSpan>> {
    let mut found = None;
    for span in FieldScanner::new(data) {
        let span = span?;
        if span.field_number == field_number {
            found = Some(span);
        }
    }
    Ok(found)
}
