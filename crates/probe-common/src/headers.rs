//! Typed registry of the rate-limit headers the gateway may return.

use serde::{Deserialize, Serialize};

/// A response header the classifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitHeader {
    Group,
    LimitPerMinute,
    CurrentPerMinute,
    RemainingPerMinute,
    LimitPerSecond,
    CurrentPerSecond,
    Reset,
    AuthMethod,
    ApiKey,
}

impl RateLimitHeader {
    pub const ALL: [RateLimitHeader; 9] = [
        RateLimitHeader::Group,
        RateLimitHeader::LimitPerMinute,
        RateLimitHeader::CurrentPerMinute,
        RateLimitHeader::RemainingPerMinute,
        RateLimitHeader::LimitPerSecond,
        RateLimitHeader::CurrentPerSecond,
        RateLimitHeader::Reset,
        RateLimitHeader::AuthMethod,
        RateLimitHeader::ApiKey,
    ];

    /// Canonical wire name.
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitHeader::Group => "X-RateLimit-Group",
            RateLimitHeader::LimitPerMinute => "X-RateLimit-Limit-Per-Minute",
            RateLimitHeader::CurrentPerMinute => "X-RateLimit-Current-Per-Minute",
            RateLimitHeader::RemainingPerMinute => "X-RateLimit-Remaining-Per-Minute",
            RateLimitHeader::LimitPerSecond => "X-RateLimit-Limit-Per-Second",
            RateLimitHeader::CurrentPerSecond => "X-RateLimit-Current-Per-Second",
            RateLimitHeader::Reset => "X-RateLimit-Reset",
            RateLimitHeader::AuthMethod => "X-Auth-Method",
            RateLimitHeader::ApiKey => "X-API-Key",
        }
    }

    /// Match a header name case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|header| header.name().eq_ignore_ascii_case(name))
    }
}

/// Snapshot of the rate-limit headers on one response.
///
/// A field is `None` when the header was absent or could not be parsed,
/// which is distinct from an explicit zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitHeaders {
    pub group: Option<String>,
    pub limit_per_minute: Option<u64>,
    pub current_per_minute: Option<u64>,
    pub remaining_per_minute: Option<u64>,
    pub limit_per_second: Option<u64>,
    pub current_per_second: Option<u64>,
    pub reset_seconds: Option<u64>,
    pub auth_method: Option<String>,
    pub api_key: Option<String>,
}

impl RateLimitHeaders {
    /// Build a snapshot from raw `(name, value)` pairs; unknown names are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            if let Some(header) = RateLimitHeader::from_name(name) {
                headers.set(header, value);
            }
        }
        headers
    }

    /// Record one header value. The first occurrence of a header wins.
    pub fn set(&mut self, header: RateLimitHeader, value: &str) {
        let value = value.trim();
        match header {
            RateLimitHeader::Group => set_text(&mut self.group, value),
            RateLimitHeader::AuthMethod => set_text(&mut self.auth_method, value),
            RateLimitHeader::ApiKey => set_text(&mut self.api_key, value),
            RateLimitHeader::LimitPerMinute => set_number(&mut self.limit_per_minute, value),
            RateLimitHeader::CurrentPerMinute => set_number(&mut self.current_per_minute, value),
            RateLimitHeader::RemainingPerMinute => {
                set_number(&mut self.remaining_per_minute, value)
            }
            RateLimitHeader::LimitPerSecond => set_number(&mut self.limit_per_second, value),
            RateLimitHeader::CurrentPerSecond => set_number(&mut self.current_per_second, value),
            RateLimitHeader::Reset => set_number(&mut self.reset_seconds, value),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Remaining quota hint, 0 when the gateway did not say.
    pub fn remaining_or_zero(&self) -> u64 {
        self.remaining_per_minute.unwrap_or(0)
    }

    /// Reset window hint in seconds, 0 when the gateway did not say.
    pub fn reset_or_zero(&self) -> u64 {
        self.reset_seconds.unwrap_or(0)
    }

    /// Whether any quota field is present.
    pub fn has_quota(&self) -> bool {
        self.limit_per_minute.is_some()
            || self.current_per_minute.is_some()
            || self.remaining_per_minute.is_some()
            || self.limit_per_second.is_some()
            || self.current_per_second.is_some()
    }
}

fn set_text(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

fn set_number(slot: &mut Option<u64>, value: &str) {
    if slot.is_none() {
        *slot = value.parse().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        assert_eq!(
            RateLimitHeader::from_name("x-ratelimit-group"),
            Some(RateLimitHeader::Group)
        );
        assert_eq!(
            RateLimitHeader::from_name("X-RATELIMIT-REMAINING-PER-MINUTE"),
            Some(RateLimitHeader::RemainingPerMinute)
        );
        assert_eq!(RateLimitHeader::from_name("Content-Type"), None);
    }

    #[test]
    fn test_from_pairs() {
        let headers = RateLimitHeaders::from_pairs([
            ("x-ratelimit-group", "premium"),
            ("x-ratelimit-limit-per-minute", "1000"),
            ("x-ratelimit-remaining-per-minute", "0"),
            ("x-auth-method", "sigv4"),
            ("content-length", "12"),
        ]);

        assert_eq!(headers.group.as_deref(), Some("premium"));
        assert_eq!(headers.limit_per_minute, Some(1000));
        assert_eq!(headers.remaining_per_minute, Some(0));
        assert_eq!(headers.auth_method.as_deref(), Some("sigv4"));
        assert_eq!(headers.limit_per_second, None);
        assert!(headers.has_quota());
    }

    #[test]
    fn test_unparsable_value_is_none_not_zero() {
        let headers =
            RateLimitHeaders::from_pairs([("X-RateLimit-Remaining-Per-Minute", "lots")]);
        assert_eq!(headers.remaining_per_minute, None);
        assert_eq!(headers.remaining_or_zero(), 0);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_first_occurrence_wins() {
        let headers = RateLimitHeaders::from_pairs([
            ("X-RateLimit-Reset", "30"),
            ("x-ratelimit-reset", "60"),
        ]);
        assert_eq!(headers.reset_or_zero(), 30);
    }
}
