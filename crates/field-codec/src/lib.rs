//! Schema-less codec for protobuf-style tagged-field messages.
//!
//! The codec never interprets payloads it does not own. It reads tags and
//! lengths to find exact field boundaries, which is enough to drop one field
//! number from an opaque record and append a rebuilt one while every other
//! byte stays where it was.

pub mod credential;
pub mod de;
pub mod error;
pub mod ser;
pub mod types;

pub use crate::{
    credential::{
        CREDENTIAL_FIELD, CredentialField, TOKEN_TYPE_BEARER, build_credential_submessage,
        decode_credential_field, splice_credentials,
    },
    de::{FieldScanner, find_field, read_varint, remove_field, skip_field},
    error::CodecError,
    ser::{FieldWriter, build_nested_field, write_varint},
    types::{FieldSpan, MAX_FIELD_NUMBER, WireType, make_tag},
};
