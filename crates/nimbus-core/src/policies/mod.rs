//! Built-in policies.

mod bearer;
mod logging;
mod request_id;
mod retry;
mod user_agent;

pub use bearer::BearerTokenPolicy;
pub use logging::LoggingPolicy;
pub use request_id::{ClientRequestIdPolicy, CLIENT_REQUEST_ID};
pub use retry::{retry_after, RetryOptions, RetryPolicy, DEFAULT_RETRY_STATUS_CODES};
pub use user_agent::{UserAgentBuilder, UserAgentPolicy, CORE_USER_AGENT};
