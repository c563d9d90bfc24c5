use crate::error::GameDataError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine constants. Saved with the game so a loaded session keeps its rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ware slots per flag.
    pub flag_capacity: usize,
    /// A flag holding more wares than this counts as congested.
    pub congestion_threshold: usize,
    /// Upper clamp for the priority of a waiting ware.
    pub max_transfer_priority: u32,
    /// Extra routing cost (ms) for passing a congested flag.
    pub congestion_penalty_ms: u64,
    /// Delay between a logistics change and the next economy balance.
    pub balance_delay_ms: u64,
    /// Delay of the act scheduled by `send_signal` and `pop_task`.
    pub signal_delay_ms: u64,
    /// Idle time of a carrier between noticing a ware and walking off.
    pub carrier_pickup_delay_ms: u64,
    /// Consecutive "blocked" signals before a soldier forces its way through.
    pub soldier_stuck_threshold: i64,
    /// Upper bound on the number of places a scout keeps in its worklist.
    pub scout_worklist_cap: usize,
    /// Random markers added per worklist refill.
    pub scout_random_markers: usize,
    /// How long a lost worker searches for a flag before giving up.
    pub fugitive_timeout_ms: u64,
    /// Interval of battle strikes.
    pub battle_round_ms: u64,
    /// Compute a state checksum every N ms of game time (0 = disabled).
    pub checksum_frequency: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            flag_capacity: 8,
            congestion_threshold: 5,
            max_transfer_priority: 16,
            congestion_penalty_ms: 3600,
            balance_delay_ms: 200,
            signal_delay_ms: 10,
            carrier_pickup_delay_ms: 50,
            soldier_stuck_threshold: 3,
            scout_worklist_cap: 254,
            scout_random_markers: 15,
            fugitive_timeout_ms: 120_000,
            battle_round_ms: 1000,
            // Once per game minute
            checksum_frequency: 60_000,
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, GameDataError> {
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        if config.flag_capacity == 0 {
            return Err(GameDataError::Invalid(
                "flag_capacity must be at least 1".to_string(),
            ));
        }
        log::info!("Loaded simulation config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.flag_capacity, 8);
        assert_eq!(config.congestion_threshold, 5);
        assert_eq!(config.max_transfer_priority, 16);
        assert_eq!(config.scout_worklist_cap, 254);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SimConfig = serde_json::from_str(r#"{ "flag_capacity": 4 }"#).unwrap();
        assert_eq!(config.flag_capacity, 4);
        assert_eq!(config.max_transfer_priority, 16);
    }
}
