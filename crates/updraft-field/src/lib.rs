//! Structured-field codec for the resumable-upload headers.
//!
//! Resumable uploads exchange five headers whose values are RFC 8941
//! structured-field bare items:
//!
//! | Header | Item type |
//! |---|---|
//! | `Upload-Token` | byte sequence |
//! | `Upload-Offset` | integer (≥ 0) |
//! | `Upload-Length` | integer (≥ 0) |
//! | `Upload-Incomplete` | boolean |
//! | `Upload-Draft-Interop-Version` | integer (≥ 0) |
//!
//! This crate parses and serializes those items strictly: a value that is
//! not a well-formed bare item of the expected type (including an item
//! carrying parameters) is rejected with [`FieldError`], which the protocol
//! layer maps to a 400 response without touching any upload state.

mod fields;
mod item;
mod token;

pub use fields::{strip_upload_headers, UploadFields};
pub use item::{
    parse_boolean, parse_byte_sequence, parse_integer, parse_non_negative, serialize_boolean,
    serialize_byte_sequence, serialize_integer, FieldError,
};
pub use token::UploadToken;

/// Header names, lowercase for direct `HeaderMap` lookups.
pub const UPLOAD_TOKEN: &str = "upload-token";
pub const UPLOAD_OFFSET: &str = "upload-offset";
pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_INCOMPLETE: &str = "upload-incomplete";
pub const UPLOAD_DRAFT_INTEROP_VERSION: &str = "upload-draft-interop-version";

/// The five resumable-upload headers, in the order they appear in the draft.
pub const UPLOAD_HEADERS: [&str; 5] = [
    UPLOAD_TOKEN,
    UPLOAD_OFFSET,
    UPLOAD_LENGTH,
    UPLOAD_INCOMPLETE,
    UPLOAD_DRAFT_INTEROP_VERSION,
];
