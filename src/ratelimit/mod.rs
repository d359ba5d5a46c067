//! Admission control: identities, policies and the fixed-window limiter.

mod backend;
mod identity;
mod limiter;
mod policy;

pub use backend::AdmissionBackend;
pub use identity::{AnonymousPolicy, Identity, ANONYMOUS_IDENTITY, MAX_IDENTITY_LEN};
pub use limiter::{RateLimiter, DEFAULT_KEY_PREFIX};
pub use policy::{
    Decision, RateLimitPolicy, RateLimitStatus, DEFAULT_LIMIT, DEFAULT_PERIOD_SECS,
    MAX_PERIOD_SECS,
};
