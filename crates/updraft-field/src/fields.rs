//! Typed extraction of the upload headers from a request header map.

use http::HeaderMap;

use crate::item::{parse_boolean, parse_non_negative, FieldError};
use crate::token::UploadToken;
use crate::{
    UPLOAD_DRAFT_INTEROP_VERSION, UPLOAD_HEADERS, UPLOAD_INCOMPLETE, UPLOAD_LENGTH, UPLOAD_OFFSET,
    UPLOAD_TOKEN,
};

/// The upload headers of one request, parsed and validated.
///
/// Each field is `None` when the header was absent. Any present-but-invalid
/// header fails the whole extraction; the protocol layer turns that into a
/// 400 with no side effects on upload state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadFields {
    pub token: Option<UploadToken>,
    pub offset: Option<u64>,
    pub length: Option<u64>,
    pub incomplete: Option<bool>,
    pub interop_version: Option<u64>,
}

impl UploadFields {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, FieldError> {
        Ok(Self {
            token: single(headers, UPLOAD_TOKEN)?
                .map(UploadToken::from_field_value)
                .transpose()?,
            offset: single(headers, UPLOAD_OFFSET)?
                .map(parse_non_negative)
                .transpose()?,
            length: single(headers, UPLOAD_LENGTH)?
                .map(parse_non_negative)
                .transpose()?,
            incomplete: single(headers, UPLOAD_INCOMPLETE)?
                .map(parse_boolean)
                .transpose()?,
            interop_version: single(headers, UPLOAD_DRAFT_INTEROP_VERSION)?
                .map(parse_non_negative)
                .transpose()?,
        })
    }

    /// Whether the request advertises resumable-upload semantics at all.
    pub fn is_resumable(&self) -> bool {
        self.token.is_some()
    }
}

/// Fetch a header that must appear at most once, as a str.
fn single<'h>(headers: &'h HeaderMap, name: &str) -> Result<Option<&'h str>, FieldError> {
    let mut values = headers.get_all(name).iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(FieldError::Repeated);
    }
    first.to_str().map(Some).map_err(|_| FieldError::Encoding)
}

/// Remove the five upload headers, leaving the rest of the map intact.
/// Used when synthesizing the downstream request.
pub fn strip_upload_headers(headers: &mut HeaderMap) {
    for name in UPLOAD_HEADERS {
        headers.remove(name);
    }
}
