use std::collections::BTreeMap;
use std::env as os_env;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::env::{parse_duration, Env};
use crate::error::{ConfigError, Error, Result};

const SUPPORTED_EXTS: [&str; 3] = ["yml", "yaml", "json"];

/// Name of the optional dotenv-style file that pre-populates process
/// environment variables before the config file is parsed.
const VARIABLES_FILENAME: &str = "variables";

/// Prefix for per-environment overrides taken from the process environment.
const ENV_VAR_PREFIX: &str = "THEMEKIT_";

static VAR_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("var reference pattern"));

/// An ordered mapping of environment names to their configuration, loaded
/// from and persisted to a YAML or JSON document.
#[derive(Debug, Clone)]
pub struct Conf {
    pub envs: BTreeMap<String, Option<Env>>,
    os_env: Env,
    path: PathBuf,
}

impl Conf {
    /// Build a new blank config rooted at the given path.
    pub fn new(config_path: impl Into<PathBuf>) -> Conf {
        Conf {
            envs: BTreeMap::new(),
            os_env: env_from_os(),
            path: config_path.into(),
        }
    }

    /// Read the config file found for the path (trying the `.yml`, `.yaml`
    /// and `.json` extensions), expand `${VAR}` references against the
    /// process environment, and unmarshal the environment map.
    pub fn load(config_path: impl Into<PathBuf>) -> Result<Conf> {
        let mut conf = Conf::new(config_path);

        let (found, ext) = search_config_path(&conf.path)?;
        let contents = fs::read_to_string(&found)?;
        let contents = expand_variables(&contents);

        conf.envs = match ext.as_str() {
            "json" => serde_json::from_str(&contents).map_err(|e| ConfigError::Malformed {
                format: "json".to_string(),
                message: e.to_string(),
            })?,
            _ => serde_yaml::from_str(&contents).map_err(|e| ConfigError::Malformed {
                format: "yaml".to_string(),
                message: e.to_string(),
            })?,
        };

        // relative directories in the file resolve against the file's own
        // directory, not the process working directory
        let base = found
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        for (name, env) in conf.envs.iter_mut() {
            if let Some(env) = env {
                env.name = name.clone();
                if !env.directory.as_os_str().is_empty() && env.directory.is_relative() {
                    env.directory = base.join(&env.directory);
                }
            }
        }

        Ok(conf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compose the effective environment for a name: flags and other
    /// overrides first, then process environment variables, then the config
    /// file entry, then built-in defaults.
    pub fn get(&self, name: &str, overrides: &[Env]) -> Result<Env> {
        let entry = match self.envs.get(name) {
            None => return Err(ConfigError::EnvDoesNotExist.into()),
            Some(None) => return Err(ConfigError::EnvNotDefined.into()),
            Some(Some(env)) => env.clone(),
        };

        let mut layers = overrides.to_vec();
        layers.push(self.os_env.clone());
        layers.push(entry);
        Env::compose(name, &layers)
    }

    /// Insert or replace an environment, composing it the same way `get`
    /// does.
    pub fn set(&mut self, name: &str, initial: Env, overrides: &[Env]) -> Result<Env> {
        if name.is_empty() {
            return Err(ConfigError::BlankEnvironmentName.into());
        }

        let mut layers = overrides.to_vec();
        layers.push(self.os_env.clone());
        layers.push(initial);
        let env = Env::compose(name, &layers)?;
        self.envs.insert(name.to_string(), Some(env.clone()));
        Ok(env)
    }

    /// Write the config out as YAML. Fields equal to built-in defaults are
    /// elided, and each directory is rewritten relative to the config file's
    /// directory when it lies beneath it.
    pub fn save(&self) -> Result<()> {
        let mut out: BTreeMap<String, Env> = BTreeMap::new();
        let config_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for (name, env) in &self.envs {
            let Some(env) = env else { continue };
            let mut env = env.clone();

            if env.directory == Env::default().directory {
                env.directory = PathBuf::new();
            } else if !env.directory.as_os_str().is_empty() {
                if let Ok(canonical_dir) = fs::canonicalize(&config_dir) {
                    if let Ok(rel) = env.directory.strip_prefix(&canonical_dir) {
                        env.directory = rel.to_path_buf();
                    }
                }
            }

            out.insert(name.clone(), env);
        }

        if out.is_empty() {
            return Err(ConfigError::NoEnvironmentsDefined.into());
        }

        let body = serde_yaml::to_string(&out)
            .map_err(|e| Error::Other(format!("could not serialize config: {}", e)))?;
        fs::write(&self.path, body)?;
        Ok(())
    }
}

fn search_config_path(config_path: &Path) -> Result<(PathBuf, String)> {
    let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = config_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    for ext in SUPPORTED_EXTS {
        let candidate = dir.join(format!("{}.{}", stem, ext));
        if candidate.exists() {
            return Ok((candidate, ext.to_string()));
        }
    }

    Err(ConfigError::NotFound {
        path: config_path.to_path_buf(),
    }
    .into())
}

/// Replace `${VAR}` references with values from the process environment.
/// Undefined variables expand to the empty string.
fn expand_variables(contents: &str) -> String {
    VAR_REFERENCE
        .replace_all(contents, |caps: &regex::Captures| {
            os_env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Source a dotenv-style variables file into the process environment before
/// config parsing. An explicit path wins; otherwise the working directory and
/// the user's config directory are searched.
pub fn source_variables(flag_path: &str) -> Result<()> {
    let path = if !flag_path.is_empty() {
        PathBuf::from(flag_path)
    } else {
        match find_variables_file() {
            Some(path) => path,
            None => return Ok(()),
        }
    };

    let contents = fs::read_to_string(&path)?;
    debug!("sourcing variables from {:?}", path);
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim_start_matches("export ").trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            os_env::set_var(key, value);
        }
    }
    Ok(())
}

fn find_variables_file() -> Option<PathBuf> {
    if let Ok(cwd) = os_env::current_dir() {
        let local = cwd.join(VARIABLES_FILENAME);
        if local.is_file() {
            return Some(local);
        }
    }

    let dirs = directories::ProjectDirs::from("dev", "weft", "weft")?;
    let global = dirs.config_dir().join(VARIABLES_FILENAME);
    global.is_file().then_some(global)
}

/// Read the `THEMEKIT_*` override variables into an environment layer. List
/// values are `:`-separated.
fn env_from_os() -> Env {
    let var = |suffix: &str| os_env::var(format!("{}{}", ENV_VAR_PREFIX, suffix)).unwrap_or_default();
    let list = |suffix: &str| -> Vec<String> {
        let raw = var(suffix);
        if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(':').map(str::to_string).collect()
        }
    };

    let directory = var("DIRECTORY");
    let timeout = var("TIMEOUT");

    Env {
        password: var("PASSWORD"),
        theme_id: var("THEME_ID"),
        domain: var("STORE"),
        directory: if directory.is_empty() {
            PathBuf::new()
        } else {
            PathBuf::from(directory)
        },
        ignored_files: list("IGNORE_FILES"),
        proxy: var("PROXY"),
        ignores: list("IGNORES"),
        timeout: parse_duration(&timeout).ok(),
        notify: var("NOTIFY"),
        read_only: false,
        name: String::new(),
    }
}
