//! Engine configuration.

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Re-deliver every waiting record when the driver sees `Startup`
    pub replay_pending_on_start: bool,
    /// Follow-up executions (local loop-backs, waiting-record resolutions)
    /// the driver runs inline per event; the rest is handed to the runtime
    pub max_replay_per_event: usize,
    /// Dismiss the prompt of a dialog answer that matched no step
    pub dismiss_orphan_dialogs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replay_pending_on_start: true,
            max_replay_per_event: 64,
            dismiss_orphan_dialogs: true,
        }
    }
}
