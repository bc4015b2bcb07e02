use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot handed to the debug controller at
/// construction. The outer server owns loading and reloading; the controller
/// only ever reads it (and rebuilds its source map from it).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfig {
    /// Runtime classpath for launched targets, in order.
    #[serde(default)]
    pub classpath: Vec<PathBuf>,
    /// Extra arguments passed to the target VM on launch.
    #[serde(default)]
    pub vm_args: Vec<String>,
    /// Every source file of the project, used to resolve the short source
    /// names the target runtime reports back to absolute paths.
    #[serde(default)]
    pub source_files: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_missing_fields() {
        let config: DebugConfig = serde_json::from_str(r#"{"vmArgs": ["-Xmx1g"]}"#).unwrap();
        assert_eq!(config.vm_args, vec!["-Xmx1g".to_string()]);
        assert!(config.classpath.is_empty());
        assert!(config.source_files.is_empty());
    }
}
