//! Repair run configuration and namespace resolution.

use crate::error::{RepairError, Result};

/// Annotation that marks a pod for automatic repair. Its value names the
/// container to run the repair in.
pub const DEFAULT_ANNOTATION: &str = "cassandra-autorepair.jmkeyes.ca/autorepair";

/// Command executed inside each selected container.
pub const DEFAULT_COMMAND: &[&str] = &["nodetool", "repair", "-pr"];

/// Environment variable carrying the namespace (set through the downward API).
pub const NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// Lines buffered between the exec stream and the logger.
pub const DEFAULT_OUTPUT_BUFFER: usize = 64;

/// Settings passed into the repair loop.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Annotation key that makes a pod eligible.
    pub annotation_key: String,
    /// Command run in the selected container.
    pub command: Vec<String>,
    /// Capacity of the output relay channel, in lines.
    pub output_buffer: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            annotation_key: DEFAULT_ANNOTATION.to_string(),
            command: DEFAULT_COMMAND.iter().map(|s| (*s).to_string()).collect(),
            output_buffer: DEFAULT_OUTPUT_BUFFER,
        }
    }
}

impl RepairConfig {
    #[must_use]
    pub fn with_annotation_key(mut self, key: impl Into<String>) -> Self {
        self.annotation_key = key.into();
        self
    }

    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the relay capacity. Zero is bumped to one since a bounded channel
    /// needs room for at least one line.
    #[must_use]
    pub fn with_output_buffer(mut self, lines: usize) -> Self {
        self.output_buffer = lines.max(1);
        self
    }
}

/// Resolve the namespace to operate in.
///
/// An explicit value wins; otherwise `POD_NAMESPACE` is read. A missing or
/// blank namespace is fatal.
pub fn resolve_namespace(explicit: Option<&str>) -> Result<String> {
    let namespace = match explicit {
        Some(ns) => ns.trim().to_string(),
        None => std::env::var(NAMESPACE_ENV)
            .map(|ns| ns.trim().to_string())
            .unwrap_or_default(),
    };

    if namespace.is_empty() {
        return Err(RepairError::NamespaceMissing(NAMESPACE_ENV.to_string()));
    }

    Ok(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = RepairConfig::default();
        assert_eq!(config.annotation_key, "cassandra-autorepair.jmkeyes.ca/autorepair");
        assert_eq!(config.command, vec!["nodetool", "repair", "-pr"]);
        assert_eq!(config.output_buffer, DEFAULT_OUTPUT_BUFFER);
    }

    #[test]
    fn test_config_overrides() {
        let config = RepairConfig::default()
            .with_annotation_key("example.com/repair")
            .with_command(["nodetool", "repair", "-full"])
            .with_output_buffer(0);

        assert_eq!(config.annotation_key, "example.com/repair");
        assert_eq!(config.command, vec!["nodetool", "repair", "-full"]);
        assert_eq!(config.output_buffer, 1);
    }

    #[test]
    #[serial]
    fn test_explicit_namespace_wins() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::set_var(NAMESPACE_ENV, "from-env");
        }
        assert_eq!(resolve_namespace(Some("cassandra")).unwrap(), "cassandra");
        unsafe {
            std::env::remove_var(NAMESPACE_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_namespace_from_env() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::set_var(NAMESPACE_ENV, " cassandra ");
        }
        assert_eq!(resolve_namespace(None).unwrap(), "cassandra");
        unsafe {
            std::env::remove_var(NAMESPACE_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_missing_namespace_is_fatal() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::remove_var(NAMESPACE_ENV);
        }
        let err = resolve_namespace(None).unwrap_err();
        assert!(matches!(err, RepairError::NamespaceMissing(_)));
        assert!(err.is_fatal());

        assert!(resolve_namespace(Some("  ")).is_err());
    }
}
