//! Request and response types for the HTTP routes.

use isohost_runtime::ExternalBuffer;
use serde::{Deserialize, Deserializer, Serialize};

/// Body returned by lifecycle routes on success.
pub const REPLY_OK: &str = "OK";
/// Body returned by every route on failure.
pub const REPLY_ERROR: &str = "ERROR";

#[derive(Debug, Clone, Deserialize)]
pub struct AddInstanceQuery {
    pub name: String,
    /// Script location, resolved by the registry's source loader.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunInstanceQuery {
    pub name: String,
    /// Missing or non-numeric values read as their leading digits, or 0.
    #[serde(default, deserialize_with = "leading_int")]
    pub a: i32,
    #[serde(default, deserialize_with = "leading_int")]
    pub b: i32,
    /// Falls back to the configured default timeout.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteInstanceQuery {
    pub name: String,
}

/// Memory handed to the script on `/run_instance`: two inputs and a slot for
/// the result, read as an `Int32Array` of length 3.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumFrame {
    pub a: i32,
    pub b: i32,
    pub ans: i32,
}

impl SumFrame {
    pub fn new(a: i32, b: i32) -> Self {
        Self { a, b, ans: 0 }
    }

    /// View this frame as an external buffer.
    ///
    /// # Safety
    ///
    /// The frame must not move, be dropped, or be read until every run using
    /// the returned view has finished.
    pub unsafe fn as_buffer(&mut self) -> ExternalBuffer {
        let len = std::mem::size_of::<Self>();
        // SAFETY: `self` is a valid, exclusively borrowed region of `len`
        // bytes; the caller upholds the lifetime contract.
        unsafe {
            let bytes = std::slice::from_raw_parts_mut(self as *mut Self as *mut u8, len);
            ExternalBuffer::from_slice(bytes)
        }
    }
}

/// Read an integer the way C's `atoi` does.
///
/// Leading whitespace and one sign are accepted, then digits up to the first
/// non-digit. No digits gives 0. Out-of-range values saturate.
pub fn parse_leading_int(raw: &str) -> i32 {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for digit in rest.bytes().take_while(u8::is_ascii_digit) {
        value = (value * 10 + i64::from(digit - b'0')).min(i64::from(i32::MAX) + 1);
    }
    let value = if negative { -value } else { value };
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn leading_int<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_leading_int(&raw))
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub instances: usize,
}
