//! Test support for the rate-limit probe workspace.
//!
//! - [`FakeGateway`]: an axum server on a random local port that answers like
//!   the rate-limiting gateway, with scripted throttling and quota headers
//! - [`fixtures`]: tenants, a service-accounts file, legacy export documents
//! - [`assert_within!`] for counts that depend on timing
//!
//! ```ignore
//! use test_utils::{FakeGateway, GatewayBehavior};
//!
//! let gateway = FakeGateway::start(GatewayBehavior::ok().throttle_every(5)).await?;
//! let url = gateway.url();
//! ```

pub mod fake_gateway;
pub mod fixtures;

pub use fake_gateway::*;
pub use fixtures::*;

/// Assert a count lies within `expected ± tolerance`.
///
/// Request counts from paced runs drift by a window or so depending on
/// scheduling, so exact equality would be flaky.
///
/// ```ignore
/// use test_utils::assert_within;
///
/// assert_within!(summary.total(), 30, 10);
/// ```
#[macro_export]
macro_rules! assert_within {
    ($actual:expr, $expected:expr, $tolerance:expr) => {{
        let actual = $actual as i64;
        let expected = $expected as i64;
        let tolerance = $tolerance as i64;
        if (actual - expected).abs() > tolerance {
            panic!(
                "assertion failed: `{}` not within `{}` ± `{}`",
                actual, expected, tolerance
            );
        }
    }};
}
