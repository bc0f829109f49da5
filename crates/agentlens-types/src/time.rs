use chrono::DateTime;
use serde_json::Value;

// Transcripts carry timestamps in three shapes: ISO-8601 strings,
// unix-seconds numbers, and unix-seconds strings. Everything is normalized
// to integer milliseconds since the epoch. A numeric value below the
// millisecond threshold is taken as seconds and scaled.

const MS_THRESHOLD: i64 = 100_000_000_000; // ~1973 in ms, ~5138 in s

/// Normalize a JSON timestamp value to epoch milliseconds.
pub fn timestamp_ms_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => timestamp_ms_from_str(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(scale_to_ms(i))
            } else {
                n.as_f64().map(|f| (f * 1000.0) as i64)
            }
        }
        _ => None,
    }
}

/// Normalize a timestamp string (ISO-8601 or unix seconds) to epoch ms.
pub fn timestamp_ms_from_str(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(scale_to_ms(i));
    }

    if let Ok(f) = trimmed.parse::<f64>() {
        return Some((f * 1000.0) as i64);
    }

    None
}

fn scale_to_ms(v: i64) -> i64 {
    if v.abs() < MS_THRESHOLD { v * 1000 } else { v }
}
