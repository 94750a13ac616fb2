//! Launch options: per-call knobs for the fire-and-forget dispatcher.

use serde::{Deserialize, Serialize};

use crate::domain::{KiteError, KiteResult};

/// Options recognised by [`crate::dispatch::Dispatcher::launch`].
///
/// All flags default to `false`. The struct is serde-friendly so the same
/// shape can come from a JSON config file:
///
/// ```ignore
/// let opts = LaunchOptions::from_json(r#"{ "observe_only": true }"#)?;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Route the failure to handlers only; the launch handle completes `Ok(())`.
    /// Use when no other party can await the operation.
    pub observe_only: bool,

    /// Yield to the scheduler once before polling the operation.
    pub force_yield: bool,

    /// Run on the caller's runtime instead of the dispatcher's worker runtime.
    pub continue_on_captured_context: bool,
}

impl LaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_only(mut self, value: bool) -> Self {
        self.observe_only = value;
        self
    }

    pub fn force_yield(mut self, value: bool) -> Self {
        self.force_yield = value;
        self
    }

    pub fn continue_on_captured_context(mut self, value: bool) -> Self {
        self.continue_on_captured_context = value;
        self
    }

    pub fn from_json(raw: &str) -> KiteResult<Self> {
        serde_json::from_str(raw).map_err(|e| KiteError::Config(format!("launch options: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_all_off() {
        let opts = LaunchOptions::default();
        assert!(!opts.observe_only);
        assert!(!opts.force_yield);
        assert!(!opts.continue_on_captured_context);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let opts = LaunchOptions::from_json(r#"{ "force_yield": true }"#).unwrap();
        assert_eq!(opts, LaunchOptions::new().force_yield(true));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = LaunchOptions::from_json("{ observe_only: yes }").unwrap_err();
        assert!(matches!(err, KiteError::Config(_)));
    }
}
