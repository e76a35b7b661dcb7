//! Process-wide switch for non-critical validation.
//!
//! Set `LUMODB_DISABLE_CHECKS=1` before the first handle is created to skip
//! checks that only produce friendlier errors than the engine would (key
//! size, database retention, write attempts through read-only handles).
//! Checks that guard memory safety run regardless.

use lazy_static::lazy_static;

/// Environment variable consulted once per process
pub const DISABLE_CHECKS_VAR: &str = "LUMODB_DISABLE_CHECKS";

lazy_static! {
    static ref CHECKS_ENABLED: bool = match std::env::var(DISABLE_CHECKS_VAR) {
        Ok(value) => {
            let disabled = parse_disable(&value);
            if disabled {
                log::info!("non-critical checks disabled via {}", DISABLE_CHECKS_VAR);
            }
            !disabled
        }
        Err(_) => true,
    };
}

fn parse_disable(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Whether non-critical checks run in this process
pub fn checks_enabled() -> bool {
    *CHECKS_ENABLED
}
