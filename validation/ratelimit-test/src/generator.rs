//! Request path and body generation.

use rand::prelude::*;

use probe_common::{ProbeRequest, TenantIdentity};

use crate::config::PathPattern;

/// Generates request paths from a [`PathPattern`].
pub struct PathGenerator {
    pattern: PathPattern,
    rng: StdRng,
}

impl PathGenerator {
    pub fn new(pattern: PathPattern) -> Self {
        let rng = match &pattern {
            PathPattern::Random {
                seed: Some(seed), ..
            } => StdRng::seed_from_u64(*seed),
            _ => StdRng::from_entropy(),
        };
        Self { pattern, rng }
    }

    /// Path for the request with the given sequence number.
    pub fn path_for(&mut self, tenant: &TenantIdentity, sequence: u64) -> String {
        match &self.pattern {
            PathPattern::Fixed { path } => {
                if path.starts_with('/') {
                    path.clone()
                } else {
                    format!("/{}", path)
                }
            }
            PathPattern::Sequential { bucket, prefix } => format!(
                "/{}/{}-{}-{}.txt",
                bucket,
                prefix,
                tenant.short_key(),
                sequence
            ),
            PathPattern::Random { bucket, objects, .. } => {
                let index = self.rng.gen_range(0..(*objects).max(1));
                format!("/{}/object-{:04}.txt", bucket, index)
            }
        }
    }
}

/// Small text payload for PUT and POST requests.
pub fn request_body(request: &ProbeRequest) -> String {
    format!(
        "rate limit probe {} #{}\n",
        request.tenant.short_key(),
        request.sequence
    )
}
