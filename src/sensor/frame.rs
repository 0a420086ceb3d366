//! Decoding of raw serial frames.

use crate::calibration::{RawSample, RAW_FIELD_COUNT};
use crate::error::{AppResult, DaqError};
use regex::Regex;
use std::sync::LazyLock;

static PLAIN_FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?$").expect("Invalid float regex")
});

/// Whether `token` is a plain decimal number (no `inf`, `nan`, hex, ...).
pub fn is_plain_float(token: &str) -> bool {
    PLAIN_FLOAT.is_match(token)
}

/// Strip non-printable characters; anything that is then not a plain float
/// becomes `"0.0"`.
pub fn clean_token(token: &str) -> String {
    let cleaned: String = token.chars().filter(|c| !c.is_control()).collect();
    if is_plain_float(&cleaned) {
        cleaned
    } else {
        "0.0".to_string()
    }
}

/// Turn one `\r` terminated frame into a [`RawSample`].
///
/// NUL bytes are removed and invalid UTF-8 is replaced before splitting on
/// whitespace. Frames with fewer than twelve tokens are rejected.
pub fn decode_frame(bytes: &[u8]) -> AppResult<RawSample> {
    let bytes: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    let text = String::from_utf8_lossy(&bytes);
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < RAW_FIELD_COUNT {
        return Err(DaqError::Sensor(format!(
            "short frame: {} of {} fields",
            tokens.len(),
            RAW_FIELD_COUNT
        )));
    }
    Ok(RawSample::new(tokens.into_iter().map(clean_token).collect()))
}
