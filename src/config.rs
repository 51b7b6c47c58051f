use serde::{Deserialize, Serialize};
use std::fs;

use crate::payment::routes::{PaymentsRoute, RoutingTable};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// Routing table file; the demo seeds its own routes when unset
    #[serde(default)]
    pub routes_file: Option<String>,
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

/// Load a routing table from its YAML file
pub fn load_routes(path: &str) -> anyhow::Result<RoutingTable> {
    let content = fs::read_to_string(path)?;
    let routes: Vec<PaymentsRoute> = serde_yaml::from_str(&content)?;
    Ok(RoutingTable::new(routes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_without_routes_file() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "lendrail.log"
use_json: false
rotation: "daily"
enable_tracing: true
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.log_level, "info");
        assert!(config.routes_file.is_none());
    }
}
