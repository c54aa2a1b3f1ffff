/// Label marking definitions managed by the orchestrator
pub const OWNED_LABEL: &str = "kro.run/owned";

/// Value the owned label must carry
pub const OWNED_LABEL_VALUE: &str = "true";

/// Span/log name of the watcher
pub(crate) const WATCHER_NAME: &str = "crd-watcher";

/// Environment prefix for configuration overrides
pub(crate) const CONFIG_ENV_PREFIX: &str = "CRD_WATCH";

/// Environment variable naming an optional configuration file
pub(crate) const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
