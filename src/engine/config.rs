//! Engine configuration options.

use crate::types::AccountId;

/// Engine configuration. market parameters live in the settings store, not here.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every event payload at info level instead of debug.
    pub verbose: bool,
    /// Only this account may suspend or resume the market. `None` leaves it open.
    pub operator: Option<AccountId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
            operator: None,
        }
    }
}
