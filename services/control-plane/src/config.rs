use std::time::Duration;

use anyhow::{Context, Result};

use crate::db::DbConfig;
use crate::env::{EnvironmentOrder, OrderingPolicy};

const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    /// Promotion order, lowest first.
    pub environments: EnvironmentOrder,
    pub ordering: OrderingPolicy,
    pub reconcile_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = lookup("XPR_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("XPR_DEV").is_some_and(|v| is_truthy(&v));

        let environments = match lookup("XPR_VALID_ENVIRONMENTS") {
            Some(list) => EnvironmentOrder::parse_list(&list)
                .with_context(|| format!("invalid XPR_VALID_ENVIRONMENTS '{list}'"))?,
            None => EnvironmentOrder::default(),
        };

        let ordering = OrderingPolicy {
            enforce_undeploy_order: lookup("XPR_ENFORCE_UNDEPLOY_ORDER")
                .is_some_and(|v| is_truthy(&v)),
        };

        let reconcile_interval = match lookup("XPR_RECONCILE_INTERVAL_SECS") {
            Some(secs) => {
                let secs: u64 = secs
                    .parse()
                    .with_context(|| format!("invalid XPR_RECONCILE_INTERVAL_SECS '{secs}'"))?;
                Duration::from_secs(secs.max(1))
            }
            None => Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        };

        let database = DbConfig::from_lookup(&lookup)?;

        Ok(Self {
            log_level,
            dev_mode,
            database,
            environments,
            ordering,
            reconcile_interval,
        })
    }
}

fn is_truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.environments, EnvironmentOrder::default());
        assert!(!config.ordering.enforce_undeploy_order);
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.database, DbConfig::default());
    }

    #[test]
    fn test_database_settings_flow_through() {
        let config = config_from(&[
            ("XPR_DATABASE_URL", "postgres://db.internal/xpr"),
            ("XPR_DB_MAX_CONNECTIONS", "3"),
        ])
        .unwrap();
        assert_eq!(config.database.database_url, "postgres://db.internal/xpr");
        assert_eq!(config.database.max_connections, 3);

        assert!(config_from(&[("XPR_DB_MAX_CONNECTIONS", "0")]).is_err());
    }

    #[test]
    fn test_custom_environment_order() {
        let config = config_from(&[("XPR_VALID_ENVIRONMENTS", "dev, prod")]).unwrap();
        let names: Vec<_> = config.environments.iter().map(|e| e.as_str()).collect();
        assert_eq!(names, vec!["dev", "prod"]);
    }

    #[test]
    fn test_duplicate_environment_is_rejected() {
        assert!(config_from(&[("XPR_VALID_ENVIRONMENTS", "DEV,DEV")]).is_err());
    }

    #[test]
    fn test_flags() {
        let config = config_from(&[
            ("XPR_DEV", "TRUE"),
            ("XPR_ENFORCE_UNDEPLOY_ORDER", "1"),
            ("XPR_RECONCILE_INTERVAL_SECS", "0"),
        ])
        .unwrap();
        assert!(config.dev_mode);
        assert!(config.ordering.enforce_undeploy_order);
        assert_eq!(config.reconcile_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_interval() {
        assert!(config_from(&[("XPR_RECONCILE_INTERVAL_SECS", "soon")]).is_err());
    }
}
