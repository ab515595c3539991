// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Small shared helpers: process-wide identifiers, timestamps, and base64.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(0);

/// Hand out the next process-unique identifier.
///
/// Frames and processors draw from the same counter, so identifiers are
/// strictly increasing in creation order across the whole process.
pub fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

static INSTANCE_COUNTS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

/// Next instance number for a type name, used for `"Type#N"` display names.
///
/// Counting starts at 0 and advances independently per name.
pub fn instance_count(type_name: &str) -> u64 {
    let mut counts = INSTANCE_COUNTS
        .get_or_init(Default::default)
        .lock()
        .expect("instance counter lock poisoned");
    let slot = counts.entry(type_name.to_owned()).or_default();
    let current = *slot;
    *slot += 1;
    current
}

/// Wall-clock timestamp as an ISO8601-like `"SECONDS.MILLISZ"` string.
pub fn now_iso8601() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    format!(
        "{}.{:03}Z",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}

/// Encode bytes to base64 using the standard alphabet.
pub fn encode_base64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode a base64 string to bytes using the standard alphabet.
///
/// Returns `None` if the input is not valid base64.
pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let first = next_object_id();
        let second = next_object_id();
        let third = next_object_id();
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn instance_counts_advance_independently_per_name() {
        assert_eq!(instance_count("UtilsTestGamma"), 0);
        assert_eq!(instance_count("UtilsTestGamma"), 1);
        assert_eq!(instance_count("UtilsTestDelta"), 0);
        assert_eq!(instance_count("UtilsTestGamma"), 2);
    }

    #[test]
    fn now_iso8601_format() {
        let ts = now_iso8601();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('.'));
    }

    #[test]
    fn base64_round_trip() {
        let data = vec![0u8, 1, 2, 250, 255];
        let encoded = encode_base64(&data);
        assert_eq!(decode_base64(&encoded), Some(data));
        assert_eq!(decode_base64("not base64!!!"), None);
    }
}
