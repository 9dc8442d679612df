// ADAPT CONTROLLER TUNABLES
// PURE-RUST MODULE: DEFAULTS AND VALIDATION ONLY.
// THE BINARY MAPS ITS CLI FLAGS ONTO AdaptConfig; LIBRARY CALLERS BUILD IT DIRECTLY.

use std::time::Duration;

use crate::error::{AdaptError, Result};

// SCHEDULE LENGTH: HOW MANY CALLS ONE PLAN COVERS BEFORE RE-PLANNING
pub const DEFAULT_WINDOW: usize = 20;

// KERNEL BANDWIDTH IN SECONDS. LARGER = SLOWER FORGETTING.
pub const DEFAULT_BANDWIDTH: f64 = 10.0;

// SAMPLES PER CONTINUOUS KNOB RANGE
pub const DEFAULT_QUANTIZE_LEVELS: usize = 4;
pub const MIN_QUANTIZE_LEVELS: usize = 2;

// THE SCHEDULER ENUMERATES THE WHOLE SPACE ON EVERY PLAN
pub const DEFAULT_MAX_DOMAIN: usize = 65_536;

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptConfig {
    pub window: usize,
    pub bandwidth: f64,
    pub quantize_levels: usize,
    pub max_domain: usize,
    // NONE: SOLVER RUNS INLINE ON THE CALLER'S THREAD, NO DEADLINE
    pub solver_timeout: Option<Duration>,
    pub record_history: bool,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            bandwidth: DEFAULT_BANDWIDTH,
            quantize_levels: DEFAULT_QUANTIZE_LEVELS,
            max_domain: DEFAULT_MAX_DOMAIN,
            solver_timeout: None,
            record_history: false,
        }
    }
}

impl AdaptConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(AdaptError::InvalidConfig("window must be > 0".into()));
        }
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.0) {
            return Err(AdaptError::InvalidConfig(format!(
                "bandwidth must be finite and > 0, got {}",
                self.bandwidth
            )));
        }
        if self.quantize_levels < MIN_QUANTIZE_LEVELS {
            return Err(AdaptError::InvalidQuantization(self.quantize_levels));
        }
        if self.max_domain == 0 {
            return Err(AdaptError::InvalidConfig("max_domain must be > 0".into()));
        }
        if let Some(t) = self.solver_timeout {
            if t.is_zero() {
                return Err(AdaptError::InvalidConfig("solver_timeout must be > 0".into()));
            }
        }
        Ok(())
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn with_quantize_levels(mut self, levels: usize) -> Self {
        self.quantize_levels = levels;
        self
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = Some(timeout);
        self
    }

    pub fn with_history(mut self, record: bool) -> Self {
        self.record_history = record;
        self
    }
}
