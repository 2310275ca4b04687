//! Runtime invariant checks with contract tracking.
//!
//! Production code states its invariants with [`assert_invariant!`]. Every
//! evaluated invariant is recorded by name in a process-wide registry, so a
//! contract test can prove that the paths it exercised actually reached the
//! checks it depends on.
//!
//! ```rust,ignore
//! assert_invariant!(
//!     from == SessionState::Active,
//!     "recording stops only from Active",
//!     "recording::controller"
//! );
//!
//! #[test]
//! fn contract_recording_lifecycle() {
//!     // ... drive a start/stop cycle ...
//!     contract_test("recording lifecycle", &["recording stops only from Active"]);
//! }
//! ```
//!
//! The registry is global rather than thread-local because the checks run on
//! tokio worker threads while the contract is asserted from the test thread.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

fn registry() -> &'static Mutex<HashSet<&'static str>> {
    static CHECKED: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
    CHECKED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Check an invariant, recording that it was evaluated.
///
/// Panics with the invariant text and context when the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__check($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariants::__check($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check(condition: bool, message: &'static str, context: Option<&str>) {
    if let Ok(mut checked) = registry().lock() {
        checked.insert(message);
    }

    if !condition {
        let context = context.unwrap_or("unknown");
        log::error!("Invariant violated [{}]: {}", context, message);
        panic!("INVARIANT VIOLATION [{}]: {}", context, message);
    }
}

/// Whether the named invariant has been evaluated at least once.
pub fn was_checked(message: &str) -> bool {
    registry()
        .lock()
        .map(|checked| checked.contains(message))
        .unwrap_or(false)
}

/// Assert that every listed invariant was evaluated.
///
/// Panics listing the invariants that were never reached.
pub fn contract_test(test_name: &str, required: &[&str]) {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|message| !was_checked(message))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}
