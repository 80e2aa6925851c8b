//! Domain model: requests, check results, reports, sessions and errors.

pub mod error;
pub mod report;
pub mod request;
pub mod result;
pub mod session;

pub use error::{CodegateError, Result};
pub use report::Report;
pub use request::{Requirements, TestCase, VerificationRequest};
pub use result::{CheckResult, CRASHED_PREFIX, SKIPPED_BLOCKING, TIMEOUT};
pub use session::{Session, SessionState};
