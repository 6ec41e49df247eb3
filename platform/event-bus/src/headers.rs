//! Header names carried next to record payloads.

/// Envelope event id
pub const EVENT_ID: &str = "x-event-id";
/// Module that produced the envelope
pub const SOURCE_MODULE: &str = "x-source-module";
/// Version of the producing module
pub const SOURCE_VERSION: &str = "x-source-version";
/// RFC 3339 creation time of the envelope
pub const OCCURRED_AT: &str = "x-occurred-at";
/// Business correlation id
pub const CORRELATION_ID: &str = "x-correlation-id";

/// 1-based delivery attempt; absent means 1
pub const ATTEMPT: &str = "x-attempt";
/// Topic the record was first published to
pub const ORIGINAL_TOPIC: &str = "x-original-topic";
/// Epoch millis before which a retry must not be processed
pub const RETRY_NOT_BEFORE: &str = "x-retry-not-before";
/// Last handler error (dead-letter records)
pub const EXCEPTION_MESSAGE: &str = "x-exception-message";
/// Why a record was dead-lettered
pub const DEAD_LETTER_REASON: &str = "x-dead-letter-reason";

/// Parse the attempt header, defaulting to the first attempt
pub fn attempt_from(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|attempt| *attempt >= 1)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_defaults_to_one() {
        assert_eq!(attempt_from(None), 1);
        assert_eq!(attempt_from(Some("")), 1);
        assert_eq!(attempt_from(Some("garbage")), 1);
        assert_eq!(attempt_from(Some("0")), 1);
    }

    #[test]
    fn test_attempt_parses() {
        assert_eq!(attempt_from(Some("1")), 1);
        assert_eq!(attempt_from(Some(" 4 ")), 4);
    }
}
