use std::env as os_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Accepted storefront domain suffixes. Local loopback addresses are exempt
/// so the transport can be pointed at a test server.
const DOMAIN_SUFFIXES: [&str; 2] = [".myshopify.com", ".myshopify.io"];

pub const DEFAULT_ENV_NAME: &str = "development";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A named binding of credentials and a project directory to a single remote
/// theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Env {
    #[serde(skip)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub theme_id: String,

    #[serde(rename = "store", default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    #[serde(default, skip_serializing_if = "path_is_empty")]
    pub directory: PathBuf,

    #[serde(
        rename = "ignore_files",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ignored_files: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignores: Vec<String>,

    #[serde(
        default,
        with = "duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(rename = "readonly", default, skip_serializing_if = "is_false")]
    pub read_only: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notify: String,
}

fn path_is_empty(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

fn is_false(value: &bool) -> bool {
    !value
}

impl Default for Env {
    fn default() -> Self {
        Env {
            name: DEFAULT_ENV_NAME.to_string(),
            password: String::new(),
            theme_id: String::new(),
            domain: String::new(),
            directory: os_env::current_dir().unwrap_or_default(),
            ignored_files: Vec::new(),
            proxy: String::new(),
            ignores: Vec::new(),
            timeout: None,
            read_only: false,
            notify: String::new(),
        }
    }
}

impl Env {
    /// Compose an environment from layered sources. The first layer that sets
    /// a field wins, so callers pass layers in precedence order: command-line
    /// flags, then process environment variables, then the config file, then
    /// built-in defaults.
    pub fn compose(name: &str, layers: &[Env]) -> Result<Env> {
        let mut env = Env {
            name: name.to_string(),
            directory: PathBuf::new(),
            ..Env::default()
        };

        for layer in layers {
            env.overlay(layer);
        }
        env.overlay(&Env::default());

        env.validate()?;
        Ok(env)
    }

    /// Fill any unset field from the other environment.
    fn overlay(&mut self, other: &Env) {
        if self.password.is_empty() {
            self.password = other.password.clone();
        }
        if self.theme_id.is_empty() {
            self.theme_id = other.theme_id.clone();
        }
        if self.domain.is_empty() {
            self.domain = other.domain.clone();
        }
        if path_is_empty(&self.directory) {
            self.directory = other.directory.clone();
        }
        if self.ignored_files.is_empty() {
            self.ignored_files = other.ignored_files.clone();
        }
        if self.proxy.is_empty() {
            self.proxy = other.proxy.clone();
        }
        if self.ignores.is_empty() {
            self.ignores = other.ignores.clone();
        }
        if self.timeout.is_none() {
            self.timeout = other.timeout;
        }
        if !self.read_only {
            self.read_only = other.read_only;
        }
        if self.notify.is_empty() {
            self.notify = other.notify.clone();
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    fn validate(&mut self) -> Result<()> {
        let mut reasons = Vec::new();

        self.theme_id = self.theme_id.trim().to_lowercase();
        if self.theme_id.is_empty() {
            reasons.push("missing theme_id".to_string());
        } else if self.theme_id == "live" {
            reasons.push(
                "'live' is no longer supported for theme_id. Please use an ID instead".to_string(),
            );
        } else if self.theme_id.parse::<i64>().map_or(true, |id| id <= 0) {
            reasons.push("invalid theme_id".to_string());
        }

        if self.domain.is_empty() {
            reasons.push("missing store domain".to_string());
        } else if !DOMAIN_SUFFIXES.iter().any(|s| self.domain.ends_with(s))
            && !self.domain.contains("127.0.0.1")
        {
            reasons.push("invalid store domain must end in '.myshopify.com'".to_string());
        }

        if self.password.is_empty() {
            reasons.push("missing password".to_string());
        }

        match validate_directory(&self.directory) {
            Ok(dir) => self.directory = dir,
            Err(reason) => reasons.push(reason),
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidEnvironment {
                name: self.name.clone(),
                reasons,
            }
            .into())
        }
    }
}

/// Resolve the project directory through symlinks to an absolute path, and
/// check it actually is a directory.
fn validate_directory(dir: &Path) -> std::result::Result<PathBuf, String> {
    let resolved = fs::canonicalize(dir)
        .map_err(|e| format!("invalid project directory {:?} {}", dir, e))?;
    if !resolved.is_dir() {
        return Err(format!("directory config {:?} is not a directory", dir));
    }
    Ok(resolved)
}

/// Durations in config files read as `30`, `"30s"`, `"1m30s"` or `"1h"`.
pub fn parse_duration(value: &str) -> std::result::Result<Duration, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(value.to_string()));
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let amount: u64 = digits
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(value.to_string()))?;
        digits.clear();
        total += match ch {
            's' => Duration::from_secs(amount),
            'm' => Duration::from_secs(amount * 60),
            'h' => Duration::from_secs(amount * 3600),
            _ => return Err(ConfigError::InvalidDuration(value.to_string())),
        };
    }
    if !digits.is_empty() {
        return Err(ConfigError::InvalidDuration(value.to_string()));
    }
    Ok(total)
}

pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, label) in [(3600, 'h'), (60, 'm'), (1, 's')] {
        if secs >= unit {
            out.push_str(&format!("{}{}", secs / unit, label));
            secs %= unit;
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

mod duration_opt {
    use std::time::Duration;

    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Text(text)) => super::parse_duration(&text)
                .map(Some)
                .map_err(|e| D::Error::custom(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    fn valid_env(dir: &TempDir) -> Env {
        Env {
            password: "secret".into(),
            theme_id: "123".into(),
            domain: "shop.myshopify.com".into(),
            directory: dir.path().to_path_buf(),
            ..Env::default()
        }
    }

    fn reasons(err: Error) -> Vec<String> {
        match err {
            Error::Config(ConfigError::InvalidEnvironment { reasons, .. }) => reasons,
            other => panic!("expected invalid environment, got {:?}", other),
        }
    }

    #[test]
    fn test_compose_valid() {
        let dir = TempDir::new().unwrap();
        let env = Env::compose("development", &[valid_env(&dir)]).unwrap();
        assert_eq!(env.name, "development");
        assert_eq!(env.theme_id, "123");
        assert_eq!(env.timeout(), DEFAULT_TIMEOUT);
        assert!(env.directory.is_absolute());
    }

    #[test]
    fn test_precedence_first_layer_wins() {
        let dir = TempDir::new().unwrap();
        let flags = Env {
            password: "from-flags".into(),
            directory: PathBuf::new(),
            ..Env::default()
        };
        let file = valid_env(&dir);

        let env = Env::compose("development", &[flags, file]).unwrap();
        assert_eq!(env.password, "from-flags");
        assert_eq!(env.theme_id, "123");
    }

    #[test]
    fn test_validation_reasons() {
        let dir = TempDir::new().unwrap();
        let env = Env {
            password: String::new(),
            theme_id: String::new(),
            domain: "example.com".into(),
            directory: dir.path().to_path_buf(),
            ..Env::default()
        };

        let rs = reasons(Env::compose("production", &[env]).unwrap_err());
        assert!(rs.contains(&"missing theme_id".to_string()));
        assert!(rs.contains(&"missing password".to_string()));
        assert!(rs.iter().any(|r| r.contains("invalid store domain")));
    }

    #[test]
    fn test_live_theme_id_rejected_with_guidance() {
        let dir = TempDir::new().unwrap();
        let env = Env {
            theme_id: "live".into(),
            ..valid_env(&dir)
        };
        let rs = reasons(Env::compose("development", &[env]).unwrap_err());
        assert!(rs.iter().any(|r| r.contains("no longer supported")));
    }

    #[test]
    fn test_negative_theme_id_rejected() {
        let dir = TempDir::new().unwrap();
        let env = Env {
            theme_id: "-4".into(),
            ..valid_env(&dir)
        };
        let rs = reasons(Env::compose("development", &[env]).unwrap_err());
        assert!(rs.contains(&"invalid theme_id".to_string()));
    }

    #[test]
    fn test_loopback_domain_exempt_from_suffix_rule() {
        let dir = TempDir::new().unwrap();
        let env = Env {
            domain: "http://127.0.0.1:5000".into(),
            ..valid_env(&dir)
        };
        assert!(Env::compose("development", &[env]).is_ok());
    }

    #[test]
    fn test_missing_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let env = Env {
            directory: dir.path().join("missing"),
            ..valid_env(&dir)
        };
        let rs = reasons(Env::compose("development", &[env]).unwrap_err());
        assert!(rs.iter().any(|r| r.contains("invalid project directory")));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }
}
