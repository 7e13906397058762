//! Per-request `X-Request-ID`, attached to every response and threaded
//! through the access-log line (§1).

use uuid::Uuid;

#[must_use]
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}
