//! Request gating: URL safety validation and abuse limiting.
//!
//! Both checks run before any upstream I/O.

pub mod dns;
pub mod rate_limit;
pub mod validator;

pub use dns::GuardedResolver;
pub use rate_limit::{is_rate_limit_exempt, RateLimiter, RateScope, RateState};
pub use validator::{
    is_forbidden_ip, HostResolver, StreamTarget, TokioResolver, UrlValidator, ValidationError,
};
