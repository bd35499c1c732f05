//! Engine configuration loading and adapter endpoint placeholder resolution.
//!
//! Mirrors the teacher's `common::config::CliConfig::load` pattern: try a
//! YAML file (path from an env var, falling back to a platform config
//! directory), parse it with `serde_yaml`, and fall back to
//! `EngineConfig::default()` when the file doesn't exist. Loading
//! `EngineConfig` from a file/environment is the one piece of
//! "configuration loading" this crate performs directly; everything else
//! about where that file lives or how it gets deployed is the caller's
//! concern.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::correlation::EngineConfig;

const CONFIG_PATH_ENV: &str = "UQE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "unified-query-engine/config.yaml";

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Loads `EngineConfig` from the path in `UQE_CONFIG`, or else
/// `$XDG_CONFIG_HOME/unified-query-engine/config.yaml` (`~/.config/...` on
/// platforms without `XDG_CONFIG_HOME`), falling back to defaults if no
/// such file exists.
pub fn load_engine_config() -> Result<EngineConfig> {
    load_engine_config_from(&config_path())
}

/// Loads `EngineConfig` from an explicit path, defaulting when the file is
/// absent. Exposed separately so callers (and tests) can bypass the
/// environment/XDG lookup in `load_engine_config`.
pub fn load_engine_config_from(path: &PathBuf) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_CONFIG_FILE)
        })
}

/// Resolves `${VAR}` placeholders in an adapter endpoint string. Unset
/// variables resolve to the empty string, which callers treat as "not
/// configured" per spec §6.
pub fn resolve_placeholders(raw: &str) -> String {
    PLACEHOLDER_PATTERN
        .replace_all(raw, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Whether a resolved endpoint is "configured" (spec §6: an endpoint whose
/// placeholder resolved to empty is treated as not configured).
pub fn is_configured(resolved_endpoint: &str) -> bool {
    !resolved_endpoint.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_default() {
        let path = PathBuf::from("/nonexistent/path/does-not-exist.yaml");
        let cfg = load_engine_config_from(&path).unwrap();
        assert_eq!(cfg.default_query_limit, 0);
    }

    #[test]
    fn existing_file_is_parsed() {
        let mut file = tempfile_path();
        writeln!(file.1, "min_anomaly_score: 0.5\ndefault_query_limit: 100\nprobes:\n  - cpu\n  - memory\n").unwrap();
        let cfg = load_engine_config_from(&file.0).unwrap();
        assert_eq!(cfg.min_anomaly_score, 0.5);
        assert_eq!(cfg.default_query_limit, 100);
        assert_eq!(cfg.probes, vec!["cpu", "memory"]);
        std::fs::remove_file(&file.0).ok();
    }

    fn tempfile_path() -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "uqe-config-test-{}.yaml",
            std::process::id()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }

    #[test]
    fn placeholder_resolves_from_environment() {
        std::env::set_var("UQE_TEST_ENDPOINT_HOST", "metrics.internal:9090");
        let resolved = resolve_placeholders("http://${UQE_TEST_ENDPOINT_HOST}/api");
        assert_eq!(resolved, "http://metrics.internal:9090/api");
        std::env::remove_var("UQE_TEST_ENDPOINT_HOST");
    }

    #[test]
    fn unset_placeholder_resolves_to_empty_and_is_not_configured() {
        std::env::remove_var("UQE_TEST_UNSET_VAR");
        let resolved = resolve_placeholders("${UQE_TEST_UNSET_VAR}");
        assert_eq!(resolved, "");
        assert!(!is_configured(&resolved));
    }

    #[test]
    fn configured_endpoint_is_recognized() {
        assert!(is_configured("http://localhost:9090"));
    }
}
