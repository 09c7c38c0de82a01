//! Maps a raw probe outcome to an outcome bucket.
//!
//! Classification looks only at the status, the rate-limit headers and the
//! method, so the same response always lands in the same bucket.

use probe_common::{
    Bucket, HttpMethod, ProbeOutcome, RateLimitHeaders, ThrottleWindow, TransportErrorKind,
};

use crate::config::ClassifierConfig;

/// Why a result landed in the error bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    Status(u16),
    Transport(TransportErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub bucket: Bucket,
    /// Set for throttled responses only
    pub window: Option<ThrottleWindow>,
    /// Group reported by a successful response
    pub detected_group: Option<String>,
    /// Auth method reported by the gateway on any response
    pub auth_method: Option<String>,
    /// Set for errors only
    pub cause: Option<ErrorCause>,
}

impl Classification {
    fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            window: None,
            detected_group: None,
            auth_method: None,
            cause: None,
        }
    }
}

pub fn classify(
    outcome: &ProbeOutcome,
    method: HttpMethod,
    config: &ClassifierConfig,
) -> Classification {
    let (status, headers) = match outcome {
        ProbeOutcome::Transport { kind, .. } => {
            let mut c = Classification::new(Bucket::Error);
            c.cause = Some(ErrorCause::Transport(*kind));
            return c;
        }
        ProbeOutcome::Http { status, headers } => (*status, headers),
    };

    let mut c = if status == 200 || status == method.success_status() {
        let mut c = Classification::new(Bucket::Success);
        c.detected_group = headers.group.clone();
        c
    } else if config.is_throttle(status) {
        let mut c = Classification::new(Bucket::Throttled);
        c.window = Some(throttle_window(headers));
        c
    } else {
        let mut c = Classification::new(Bucket::Error);
        c.cause = Some(ErrorCause::Status(status));
        c
    };
    c.auth_method = headers.auth_method.clone();
    c
}

/// Which limiter a throttled response is attributed to.
pub fn throttle_window(headers: &RateLimitHeaders) -> ThrottleWindow {
    if let (Some(current), Some(limit)) = (headers.current_per_second, headers.limit_per_second) {
        if current >= limit {
            return ThrottleWindow::Burst;
        }
    }
    if let (Some(current), Some(limit)) = (headers.current_per_minute, headers.limit_per_minute) {
        if current >= limit {
            return ThrottleWindow::Minute;
        }
    }
    if headers.remaining_per_minute == Some(0) {
        return ThrottleWindow::Minute;
    }
    ThrottleWindow::Unknown
}
