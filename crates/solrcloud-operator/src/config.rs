use std::time::Duration;

const DEFAULT_FIELD_MANAGER: &str = "solrcloud-operator";
const DEFAULT_REQUEUE_SECONDS: u64 = 300;

/// Process-level settings, read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub field_manager: String,
    pub requeue: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            field_manager: DEFAULT_FIELD_MANAGER.into(),
            requeue: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            field_manager: non_empty("FIELD_MANAGER")
                .unwrap_or_else(|| DEFAULT_FIELD_MANAGER.into()),
            requeue: Duration::from_secs(
                non_empty("REQUEUE_SECONDS")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(DEFAULT_REQUEUE_SECONDS),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> OperatorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), OperatorConfig::default());
    }

    #[test]
    fn reads_overrides_and_ignores_bad_requeue() {
        let cfg = config(&[
            ("WATCH_NAMESPACE", "search"),
            ("FIELD_MANAGER", "custom"),
            ("REQUEUE_SECONDS", "soon"),
        ]);
        assert_eq!(cfg.watch_namespace.as_deref(), Some("search"));
        assert_eq!(cfg.field_manager, "custom");
        assert_eq!(cfg.requeue, Duration::from_secs(300));
        assert_eq!(config(&[("REQUEUE_SECONDS", "60")]).requeue, Duration::from_secs(60));
    }
}
