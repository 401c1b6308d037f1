use serde::{Deserialize, Serialize};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomConfig {
    /// Answer structural queries of unloaded files from their stubs. When
    /// false, the tree is loaded before the first query.
    pub use_stubs: bool,

    /// Run the validity check before every operation on a handle
    pub check_validity_on_access: bool,

    /// Trace every change event as it is fired
    pub log_events: bool,
}

impl Default for DomConfig {
    fn default() -> Self {
        Self {
            use_stubs: true,
            check_validity_on_access: true,
            log_events: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DomConfig = serde_json::from_str(r#"{ "use_stubs": false }"#).unwrap();
        assert!(!config.use_stubs);
        assert!(config.check_validity_on_access);
        assert!(!config.log_events);
    }
}
