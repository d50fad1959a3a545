use serde::Deserialize;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// An extra entity-type route registered on top of the built-in ones.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub entity_type: String,
    pub collection: String,
    pub conflict_key: String,
}

/// Engine-wide settings handed to the orchestrator at construction.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub default_batch_size: usize,
    pub default_timeout_secs: u64,
    /// Fail runs whose declared auth method lacks credentials instead of
    /// sending them unauthenticated.
    pub strict_auth: bool,
    /// Upserts in flight per batch; 1 keeps loading sequential.
    pub max_concurrent_upserts: usize,
    /// Reject a run while another run of the same integration is active.
    pub exclusive_runs: bool,
    pub extra_routes: Vec<RouteConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            strict_auth: false,
            max_concurrent_upserts: 1,
            exclusive_runs: false,
            extra_routes: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Batch size for an integration; unset or zero falls back to the engine default.
    pub fn batch_size_for(&self, configured: Option<usize>) -> usize {
        match configured {
            Some(size) if size > 0 => size,
            _ if self.default_batch_size > 0 => self.default_batch_size,
            _ => DEFAULT_BATCH_SIZE,
        }
    }

    /// Fetch timeout for an integration; unset or zero falls back to the engine default.
    pub fn timeout_secs_for(&self, configured: Option<u64>) -> u64 {
        match configured {
            Some(secs) if secs > 0 => secs,
            _ if self.default_timeout_secs > 0 => self.default_timeout_secs,
            _ => DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_fallbacks() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size_for(None), 100);
        assert_eq!(config.batch_size_for(Some(0)), 100);
        assert_eq!(config.batch_size_for(Some(2)), 2);
        assert_eq!(config.timeout_secs_for(None), 30);
        assert_eq!(config.timeout_secs_for(Some(5)), 5);
    }

    #[test]
    fn test_zero_defaults_fall_back_to_constants() {
        let config = EngineConfig {
            default_batch_size: 0,
            default_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.batch_size_for(None), DEFAULT_BATCH_SIZE);
        assert_eq!(config.timeout_secs_for(None), DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.timeout_secs_for(Some(0)), DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.timeout_secs_for(Some(7)), 7);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"strict_auth": true, "extra_routes": [{"entity_type": "books", "collection": "books", "conflict_key": "isbn"}]}"#,
        )
        .unwrap();
        assert!(config.strict_auth);
        assert_eq!(config.default_batch_size, 100);
        assert_eq!(config.extra_routes[0].conflict_key, "isbn");
    }
}
