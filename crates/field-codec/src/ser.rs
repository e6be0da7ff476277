use crate::{
    error::{CodecError, Result},
    types::{MAX_FIELD_NUMBER, WireType, make_tag},
};
use bytes::{BufMut, BytesMut};

/// Encode `value` as a canonical (minimal-length) base-128 varint.
pub fn write_varint(value: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5);
    put_varint(&mut buf, value);
    buf.to_vec()
}

fn put_varint(buf: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn length_prefix(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge { len })
}

fn check_field_number(field_number: u32) -> Result<()> {
    if field_number > MAX_FIELD_NUMBER {
        return Err(CodecError::FieldNumberOutOfRange(field_number));
    }
    Ok(())
}

/// Builds an encoded message field by field.
pub struct FieldWriter {
    buffer: BytesMut,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn into_inner(self) -> BytesMut {
        self.buffer
    }

    pub fn write_tag(&mut self, field_number: u32, wire_type: WireType) {
        put_varint(&mut self.buffer, make_tag(field_number, wire_type));
    }

    pub fn write_varint(&mut self, field_number: u32, value: u32) {
        self.write_tag(field_number, WireType::Varint);
        put_varint(&mut self.buffer, value);
    }

    pub fn write_bytes(&mut self, field_number: u32, payload: &[u8]) -> Result<()> {
        check_field_number(field_number)?;
        let len = length_prefix(payload.len())?;
        self.write_tag(field_number, WireType::LengthDelimited);
        put_varint(&mut self.buffer, len);
        self.buffer.put_slice(payload);
        Ok(())
    }

    pub fn write_string(&mut self, field_number: u32, value: &str) -> Result<()> {
        self.write_bytes(field_number, value.as_bytes())
    }

    /// Append pre-encoded bytes verbatim.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }
}

impl Default for FieldWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap `payload` as a LENGTH_DELIMITED field: `varint(tag) ++ varint(len) ++ payload`.
pub fn build_nested_field(field_number: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut writer = FieldWriter::new();
    writer.write_bytes(field_number, payload)?;
    Ok(writer.into_inner().to_vec())
}
