//! The OAuth credential sub-message carried as field 6 of the host's record.
//!
//! Layout of the sub-message, in the order it is written:
//!
//! | field | wire type | contents |
//! |-------|-----------|----------|
//! | 1 | LENGTH_DELIMITED | access token |
//! | 2 | LENGTH_DELIMITED | token type, always `"Bearer"` |
//! | 3 | LENGTH_DELIMITED | refresh token |
//! | 4 | LENGTH_DELIMITED | timestamp message: field 1 VARINT, Unix seconds |
//!
//! Everything else in the outer record is opaque and passes through untouched.

use crate::{
    de::{FieldScanner, find_field, read_varint, remove_field},
    error::{CodecError, Result},
    ser::{FieldWriter, build_nested_field},
    types::WireType,
};

/// Field number of the credential sub-message in the outer record.
pub const CREDENTIAL_FIELD: u32 = 6;

/// Token type written into sub-field 2.
pub const TOKEN_TYPE_BEARER: &str = "Bearer";

const ACCESS_TOKEN_FIELD: u32 = 1;
const TOKEN_TYPE_FIELD: u32 = 2;
const REFRESH_TOKEN_FIELD: u32 = 3;
const EXPIRY_FIELD: u32 = 4;
const TIMESTAMP_SECONDS_FIELD: u32 = 1;

fn expiry_seconds(expiry_ms: i64) -> Result<u32> {
    u32::try_from(expiry_ms.div_euclid(1000)).map_err(|_| CodecError::ExpiryOutOfRange(expiry_ms))
}

/// Build the complete field 6 (tag, length and sub-message) for the given tokens.
///
/// `expiry_ms` is milliseconds since the Unix epoch; the record stores whole seconds.
pub fn build_credential_submessage(
    access_token: &str,
    refresh_token: &str,
    expiry_ms: i64,
) -> Result<Vec<u8>> {
    let mut timestamp = FieldWriter::new();
    timestamp.write_varint(TIMESTAMP_SECONDS_FIELD, expiry_seconds(expiry_ms)?);

    let mut inner = FieldWriter::new();
    inner.write_string(ACCESS_TOKEN_FIELD, access_token)?;
    inner.write_string(TOKEN_TYPE_FIELD, TOKEN_TYPE_BEARER)?;
    inner.write_string(REFRESH_TOKEN_FIELD, refresh_token)?;
    inner.write_bytes(EXPIRY_FIELD, &timestamp.into_inner())?;

    build_nested_field(CREDENTIAL_FIELD, &inner.into_inner())
}

/// Replace field 6 of `record` with freshly built credentials.
///
/// The retained fields keep their original order and bytes; the new field is appended.
pub fn splice_credentials(
    record: &[u8],
    access_token: &str,
    refresh_token: &str,
    expiry_ms: i64,
) -> Result<Vec<u8>> {
    let mut out = FieldWriter::new();
    out.write_raw(&remove_field(record, CREDENTIAL_FIELD)?);
    out.write_raw(&build_credential_submessage(
        access_token,
        refresh_token,
        expiry_ms,
    )?);
    Ok(out.into_inner().to_vec())
}

/// Decoded view of the credential sub-message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialField {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    /// Unix seconds, when the timestamp sub-message is present.
    pub expiry_seconds: Option<u32>,
}

fn read_string(data: &[u8], range: std::ops::Range<usize>) -> Result<String> {
    Ok(String::from_utf8(data[range].to_vec())?)
}

fn decode_timestamp(payload: &[u8]) -> Result<Option<u32>> {
    let mut seconds = None;
    for span in FieldScanner::new(payload) {
        let span = span?;
        if span.field_number == TIMESTAMP_SECONDS_FIELD && span.wire_type == WireType::Varint {
            seconds = Some(read_varint(payload, span.payload_start)?.0);
        }
    }
    Ok(seconds)
}

/// Decode field 6 of `record`, or `None` when the record carries no credentials.
///
/// Unknown sub-fields are skipped; the last occurrence of a repeated sub-field wins.
pub fn decode_credential_field(record: &[u8]) -> Result<Option<CredentialField>> {
    let Some(outer) = find_field(record, CREDENTIAL_FIELD)? else {
        return Ok(None);
    };
    if outer.wire_type != WireType::LengthDelimited {
        return Ok(None);
    }

    let payload = &record[outer.payload_range()];
    let mut field = CredentialField::default();

    for span in FieldScanner::new(payload) {
        let span = span?;
        if span.wire_type != WireType::LengthDelimited {
            continue;
        }
        match span.field_number {
            ACCESS_TOKEN_FIELD => field.access_token = read_string(payload, span.payload_range())?,
            TOKEN_TYPE_FIELD => field.token_type = read_string(payload, span.payload_range())?,
            REFRESH_TOKEN_FIELD => {
                field.refresh_token = read_string(payload, span.payload_range())?
            }
            EXPIRY_FIELD => {
                field.expiry_seconds = decode_timestamp(&payload[span.payload_range()])?
            }
            _ => {}
        }
    }

    Ok(Some(field))
}
