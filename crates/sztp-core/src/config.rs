//! Environment file and `SZTPD_*` lookups
//!
//! The daemon's CLI falls back to `SZTPD_*` variables, so a line in
//! `/etc/sztpd/environment` behaves like a command-line default:
//!
//! ```text
//! # /etc/sztpd/environment
//! SZTPD_MODE=x
//! SZTPD_DB_URL=sqlite:///var/lib/sztpd/sztpd.db
//! export SZTPD_BOOTSTRAP_TLS_KEY="/etc/sztpd/tls/sbi.key"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Variable naming an alternative environment file
pub const ENV_FILE_VAR: &str = "SZTPD_ENV_FILE";

/// Fallback locations, first match wins
pub const ENV_FILE_PATHS: &[&str] = &["/etc/sztpd/environment", "/etc/sztpd.env"];

/// Variables whose values are never logged
const REDACTED: &[&str] = &["PASSWORD", "KEY", "SECRET", "ACTIVATION"];

/// What applying an environment file did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    pub path: PathBuf,
    /// Variables set from the file
    pub applied: usize,
    /// Variables left alone because the process already had them
    pub kept: usize,
}

/// Apply the first environment file found: `$SZTPD_ENV_FILE`, then
/// [`ENV_FILE_PATHS`]. Variables already present in the process environment
/// win over the file.
pub fn load_environment() -> Option<EnvFile> {
    let explicit = std::env::var_os(ENV_FILE_VAR).map(PathBuf::from);
    let candidates = explicit
        .into_iter()
        .chain(ENV_FILE_PATHS.iter().map(PathBuf::from));

    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match apply_env_file(&path) {
            Ok(loaded) => {
                info!(
                    path = %loaded.path.display(),
                    applied = loaded.applied,
                    kept = loaded.kept,
                    "Environment file applied"
                );
                return Some(loaded);
            }
            Err(e) => warn!("Failed to read environment file {}: {}", path.display(), e),
        }
    }
    debug!("No environment file found, using the process environment");
    None
}

fn apply_env_file(path: &Path) -> std::io::Result<EnvFile> {
    let content = std::fs::read_to_string(path)?;
    let mut loaded = EnvFile {
        path: path.to_path_buf(),
        applied: 0,
        kept: 0,
    };
    for (key, value) in parse_env_content(&content) {
        if std::env::var_os(&key).is_some() {
            debug!(%key, "already set, keeping process value");
            loaded.kept += 1;
            continue;
        }
        let shown = if REDACTED.iter().any(|word| key.contains(word)) { "***" } else { value.as_str() };
        debug!("{}={}", key, shown);
        std::env::set_var(&key, &value);
        loaded.applied += 1;
    }
    Ok(loaded)
}

/// Parse the body of an environment file, skipping comments and blank lines.
pub fn parse_env_content(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_env_line)
        .collect()
}

/// Parse a single `KEY=VALUE` line, accepting `export` and surrounding quotes.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

pub fn get_config(key: &str, default: &str) -> String {
    get_config_opt(key).unwrap_or_else(|| default.to_string())
}

/// Set and non-empty
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// `true`/`1`/`yes`/`on` (any case) are true; anything else set is false
pub fn get_config_bool(key: &str, default: bool) -> bool {
    get_config_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

pub fn get_config_int(key: &str, default: i64) -> i64 {
    get_config_parsed(key).unwrap_or(default)
}

/// Value parsed as `T`; unparsable values are logged and ignored
pub fn get_config_parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = get_config_opt(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(%key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("SZTPD_MODE=x").unwrap();
        assert_eq!(k, "SZTPD_MODE");
        assert_eq!(v, "x");
    }

    #[test]
    fn test_parse_env_line_quoted_and_exported() {
        let (k, v) = parse_env_line("export SZTPD_DATABASE_URL=\"sqlite://a b.db\"").unwrap();
        assert_eq!(k, "SZTPD_DATABASE_URL");
        assert_eq!(v, "sqlite://a b.db");

        let (_, v) = parse_env_line("FOO='bar'").unwrap();
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
        assert!(parse_env_line("no-equals-sign").is_none());
    }

    #[test]
    fn test_parse_env_content_skips_comments() {
        let parsed = parse_env_content("# comment\n\nA=1\n  B = two  \n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two".to_string())
            ]
        );
    }

    #[test]
    fn test_apply_env_file_keeps_process_values() {
        let dir = std::env::temp_dir().join(format!("sztpd-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("environment");
        std::fs::write(&path, "SZTPD_TEST_ENV_APPLIED=1\nPATH=/nowhere\n").unwrap();

        let loaded = apply_env_file(&path).unwrap();
        assert_eq!(loaded.applied, 1);
        assert_eq!(loaded.kept, 1);
        assert_eq!(get_config_int("SZTPD_TEST_ENV_APPLIED", 0), 1);
        assert_ne!(std::env::var("PATH").unwrap(), "/nowhere");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_get_config_bool_default() {
        assert!(get_config_bool("SZTPD_TEST_SURELY_UNSET_FLAG", true));
        assert_eq!(get_config_int("SZTPD_TEST_SURELY_UNSET_INT", 7), 7);
    }
}
