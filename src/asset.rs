use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::Env;
use crate::error::{AssetError, Error, Result};
use crate::filter::Filter;

/// A single theme file at the API boundary. Exactly one of `value` (UTF-8
/// text) or `attachment` (base64-encoded binary) carries the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attachment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
}

impl Asset {
    /// An asset is valid iff it has a key and a non-empty payload.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty() && (!self.value.is_empty() || !self.attachment.is_empty())
    }

    /// Write the asset out under the destination directory, creating
    /// intermediate directories with the destination's mode bits. JSON
    /// payloads are pretty printed before writing.
    pub fn write(&self, directory: &Path) -> Result<()> {
        let meta = fs::metadata(directory)?;
        let filename = directory.join(&self.key);

        if let Some(parent) = filename.parent() {
            create_dirs_like(parent, &meta)?;
        }

        let contents = self.contents()?;
        fs::write(&filename, contents).map_err(|source| AssetError::Write {
            path: filename.clone(),
            source,
        })?;
        Ok(())
    }

    fn contents(&self) -> Result<Vec<u8>> {
        if !self.value.is_empty() {
            if Path::new(&self.key).extension().is_some_and(|e| e == "json") {
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&self.value) {
                    let mut pretty = serde_json::to_string_pretty(&parsed)
                        .unwrap_or_else(|_| self.value.clone());
                    pretty.push('\n');
                    return Ok(pretty.into_bytes());
                }
            }
            return Ok(self.value.clone().into_bytes());
        }

        if !self.attachment.is_empty() {
            return Ok(BASE64.decode(&self.attachment).map_err(|e| AssetError::Decode {
                key: self.key.clone(),
                message: e.to_string(),
            })?);
        }

        Ok(Vec::new())
    }
}

#[cfg(unix)]
fn create_dirs_like(path: &Path, reference: &fs::Metadata) -> Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
    fs::DirBuilder::new()
        .recursive(true)
        .mode(reference.permissions().mode())
        .create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dirs_like(path: &Path, _reference: &fs::Metadata) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Read a single asset from disk, keyed relative to the project directory.
pub fn read_asset(root: &Path, filename: &str) -> Result<Asset> {
    let path = root.join(filename);

    let info = fs::metadata(&path).map_err(|source| AssetError::Read {
        path: path.clone(),
        source,
    })?;
    if info.is_dir() {
        return Err(AssetError::IsDirectory.into());
    }

    let buffer = fs::read(&path).map_err(|source| AssetError::Read {
        path: path.clone(),
        source,
    })?;

    let key = filename.replace('\\', "/");
    let is_json = Path::new(&key).extension().is_some_and(|e| e == "json");

    let mut asset = Asset {
        key,
        ..Asset::default()
    };

    match detect_text(&buffer) {
        Some(text) => {
            asset.checksum = text_checksum(text, is_json);
            asset.value = text.to_string();
        }
        None => {
            asset.checksum = bytes_checksum(&buffer);
            asset.attachment = BASE64.encode(&buffer);
        }
    }

    Ok(asset)
}

/// Find assets for the given project-relative paths, recursing into
/// directories. An empty path list walks the whole project directory. The
/// environment's filter is applied to every candidate key.
pub fn find_assets(env: &Env, paths: &[String]) -> Result<Vec<Asset>> {
    let filter = Filter::new(&env.directory, &env.ignored_files, &env.ignores)?;

    if paths.is_empty() {
        return assets_from_directory(env, "", &filter);
    }

    let mut assets = Vec::new();
    for path in paths {
        match read_asset(&env.directory, path) {
            Ok(asset) => {
                if !filter.matches(&asset.key) {
                    assets.push(asset);
                }
            }
            Err(Error::Asset(AssetError::IsDirectory)) => {
                assets.extend(assets_from_directory(env, path, &filter)?);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(assets)
}

fn assets_from_directory(env: &Env, dir: &str, filter: &Filter) -> Result<Vec<Asset>> {
    let root = &env.directory;
    let mut assets = Vec::new();

    for entry in WalkDir::new(root.join(dir)).follow_links(true) {
        let entry = entry.map_err(|e| Error::Other(format!("could not walk project: {}", e)))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let key = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Other(format!("path outside project: {}", e)))?
            .to_string_lossy()
            .replace('\\', "/");
        if !filter.matches(&key) {
            assets.push(read_asset(root, &key)?);
        }
    }

    Ok(assets)
}

/// Detect whether a payload is text. Binary payloads travel base64-encoded.
fn detect_text(buffer: &[u8]) -> Option<&str> {
    match std::str::from_utf8(buffer) {
        Ok(text) if !buffer.contains(&0) => Some(text),
        _ => None,
    }
}

/// Hex digest of a text payload. JSON values are digested over their
/// whitespace-canonicalized form so that formatting differences between a
/// local file and the server copy do not register as changes.
pub fn text_checksum(value: &str, is_json: bool) -> String {
    if is_json {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(value) {
            if let Ok(compact) = serde_json::to_string(&parsed) {
                return bytes_checksum(compact.as_bytes());
            }
        }
    }
    bytes_checksum(value.as_bytes())
}

/// Hex digest of a raw byte payload.
pub fn bytes_checksum(value: &[u8]) -> String {
    let mut hash = Sha256::new();
    hash.update(value);
    format!("{:x}", hash.finalize())
}

/// Current checksum of a project file, keyed the same way uploads are.
pub fn file_checksum(root: &Path, key: &str) -> Result<String> {
    Ok(read_asset(root, key)?.checksum)
}
