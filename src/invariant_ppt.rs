//! Runtime invariant checks with contract-test support
//!
//! Code asserts its invariants with [`assert_invariant!`](crate::assert_invariant);
//! every check is counted in a per-thread log. Tests then call
//! [`contract_test`] to prove the invariants they care about were actually
//! exercised, not merely declared.
//!
//! ```rust,ignore
//! use mcam_autofocus::invariant_ppt::*;
//!
//! assert_invariant!(
//!     best >= previous_best,
//!     "global best metric never decreases",
//!     "focus::search"
//! );
//!
//! #[test]
//! fn contract_search() {
//!     // ... run a search ...
//!     contract_test("search", &["global best metric never decreases"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::thread_local;

thread_local! {
    static INVARIANT_LOG: RefCell<HashMap<String, u64>> = RefCell::new(HashMap::new());
}

/// Assert an invariant and record that it was checked.
///
/// Panics with the context and message if the condition is false. Inside an
/// orchestrator worker the panic is contained and reported as an internal
/// failure of that camera.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        *log.borrow_mut().entry(message.to_string()).or_insert(0) += 1;
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("Invariant violated in {}: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// How many times `message` was checked on this thread.
pub fn times_checked(message: &str) -> u64 {
    INVARIANT_LOG.with(|log| log.borrow().get(message).copied().unwrap_or(0))
}

/// Panic unless every listed invariant was checked at least once on this
/// thread.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| times_checked(invariant) == 0)
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| log.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_are_counted() {
        clear_invariant_log();
        assert_invariant!(true, "unit: counted");
        assert_invariant!(1 + 1 == 2, "unit: counted", "tests");
        assert_eq!(times_checked("unit: counted"), 2);
        contract_test("counted", &["unit: counted"]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [tests]: unit: broken")]
    fn test_violation_panics() {
        assert_invariant!(false, "unit: broken", "tests");
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_unchecked_contract_fails() {
        clear_invariant_log();
        contract_test("missing", &["unit: never checked"]);
    }
}
