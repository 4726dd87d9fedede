use std::path::PathBuf;

const DEFAULT_LOG_FILTER: &str = "campusd=info";

/// Process-level settings read once at startup. Workspace-scoped settings
/// live in the workspace database instead.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            log_filter: non_empty("CAMPUSD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            workspace: non_empty("CAMPUSD_WORKSPACE").map(PathBuf::from),
        }
    }
}
