//! Runtime tuning knobs, read once per register rather than process
//! globals, with a programmatic override available via the builder
//! methods for tests and embedders who do not want to touch the process
//! environment.

use crate::math::{N, R};

/// Default separability threshold: a marginal Bloch-vector length within
/// this of 1 is treated as pure.
pub const DEFAULT_SEPARABILITY_THRESHOLD: R = 1e-6;

/// Per-register tuning state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Separability threshold, in `(0, 1]`.
    pub separability_threshold: R,
    /// Whether the separator runs automatically after multi-qubit gates.
    pub reactive_separate: bool,
    /// Hint forwarded to the engine backend for its own device/size
    /// dispatch; the core does not interpret it itself.
    pub threshold_qubits: N,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            separability_threshold: env_r(
                "QRACK_QUNIT_SEPARABILITY_THRESHOLD",
                DEFAULT_SEPARABILITY_THRESHOLD,
            ),
            reactive_separate: env_bool("QRACK_QUNIT_REACTIVE_SEPARATE", true),
            threshold_qubits: env_n("QRACK_QUNIT_THRESHOLD_QUBITS", 0),
        }
    }
}

impl Config {
    /// Builds a [`Config`] entirely from explicit values, ignoring the
    /// environment. Prefer this in tests, so that a developer's shell
    /// environment cannot make a test flaky.
    pub fn new(separability_threshold: R, reactive_separate: bool, threshold_qubits: N) -> Self {
        debug_assert!(
            separability_threshold > 0.0 && separability_threshold <= 1.0,
            "separability_threshold must be in (0, 1]"
        );
        Self {
            separability_threshold,
            reactive_separate,
            threshold_qubits,
        }
    }

    pub fn with_separability_threshold(mut self, tau: R) -> Self {
        self.separability_threshold = tau;
        self
    }

    pub fn with_reactive_separate(mut self, reactive: bool) -> Self {
        self.reactive_separate = reactive;
        self
    }
}

fn env_r(key: &str, default: R) -> R {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim() {
            "0" | "false" | "FALSE" | "False" => Some(false),
            "1" | "true" | "TRUE" | "True" => Some(true),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_n(key: &str, default: N) -> N {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_ignores_environment() {
        let cfg = Config::new(0.5, false, 10);
        assert_eq!(cfg.separability_threshold, 0.5);
        assert!(!cfg.reactive_separate);
        assert_eq!(cfg.threshold_qubits, 10);
    }

    #[test]
    fn default_threshold_in_range() {
        let cfg = Config::default();
        assert!(cfg.separability_threshold > 0.0 && cfg.separability_threshold <= 1.0);
    }
}
