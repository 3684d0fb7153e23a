use serde::Deserialize;
use std::time::Duration;

/// Engine tuning knobs. The coin table itself is a separate document fed to
/// [`crate::registry::CoinRegistry::load`]; this struct only carries
/// cadences and the hang policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the liveness monitor compares queue heads.
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// How often each platform adapter wakes to drain one batch.
    #[serde(with = "humantime_serde")]
    pub dispatch_interval: Duration,

    /// Consecutive stalled polls tolerated before the monitor requests a
    /// supervised shutdown (and only when every active platform is stalled).
    pub hang_max_strikes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            monitor_interval: Duration::from_secs(3 * 60),
            dispatch_interval: Duration::from_secs(10),
            hang_max_strikes: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.monitor_interval, Duration::from_secs(180));
        assert_eq!(config.dispatch_interval, Duration::from_secs(10));
        assert_eq!(config.hang_max_strikes, 3);
    }

    #[test]
    fn deserialize_with_humantime_durations() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "monitor_interval": "1m", "dispatch_interval": "5s", "hang_max_strikes": 2 }"#,
        )
        .unwrap();
        assert_eq!(config.monitor_interval, Duration::from_secs(60));
        assert_eq!(config.dispatch_interval, Duration::from_secs(5));
        assert_eq!(config.hang_max_strikes, 2);
    }

    #[test]
    fn deserialize_partial_falls_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "hang_max_strikes": 5 }"#).unwrap();
        assert_eq!(config.hang_max_strikes, 5);
        assert_eq!(config.monitor_interval, Duration::from_secs(180));
    }
}
