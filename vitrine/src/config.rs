//! Configuration discovery and merge: built-in defaults, the YAML file
//! layers, command-line overrides, interactive prompts.
//!
//! Precedence, lowest to highest: built-in defaults, the file's
//! `defaults` section, the file's section for the selected mount point,
//! the command line. Mappings merge recursively, scalars overwrite.

use crate::{fs::CacheOptions, util};
use serde_yaml::{Mapping, Value};
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "~/.vitrine.yaml";

const BUILT_IN_DEFAULTS: &str = "
foreground: false
no-input: false
attribute-cache:
  lifetime: 3600
directory-cache:
  lifetime: 60
file-cache:
  lifetime: 3600
  max-bytes: \"100M\"
  max-files: 1000
";

/// Settings that must be present after the merge, in prompt order.
const REQUIRED_SETTINGS: [(&str, &str); 4] = [
    ("mount-point", "Mount point: "),
    ("bucket", "Bucket: "),
    ("access-key", "Access key: "),
    ("secret-key", "Secret key: "),
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration for {}", .fields.join(", "))]
    Missing { fields: Vec<String> },
    #[error("could not read {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("could not parse {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {source}")]
    Invalid {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Fully merged and validated settings for one mount.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    pub mount_point: PathBuf,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub foreground: bool,
    #[serde(default)]
    pub no_input: bool,
    /// Custom S3-compatible endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bucket region; the default is resolved by the store backend.
    #[serde(default)]
    pub region: Option<String>,
    pub attribute_cache: CacheSection,
    pub directory_cache: CacheSection,
    pub file_cache: FileCacheSection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheSection {
    /// Seconds an entry stays servable.
    pub lifetime: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileCacheSection {
    pub lifetime: u64,
    #[serde(deserialize_with = "byte_size")]
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Settings {
    /// Scratch-file location for this mount's bucket.
    pub fn scratch_dir(&self) -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".vitrine").join("cache").join(&self.bucket))
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            attribute_lifetime: Duration::from_secs(self.attribute_cache.lifetime),
            directory_lifetime: Duration::from_secs(self.directory_cache.lifetime),
            file_lifetime: Duration::from_secs(self.file_cache.lifetime),
            file_max_bytes: self.file_cache.max_bytes,
            file_max_files: self.file_cache.max_files,
        }
    }
}

fn byte_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde::Deserialize;

    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| D::Error::custom("byte sizes must be positive integers")),
        Value::String(text) => util::parse_byte_size(&text).map_err(D::Error::custom),
        _ => Err(D::Error::custom(
            "byte sizes are integers or strings with an SI suffix",
        )),
    }
}

/// Merge all configuration layers for `mount_point` and validate the
/// result. `overrides` holds the settings given on the command line and
/// always contains the mount point.
pub fn resolve(config_file: &str, mount_point: &Path, overrides: Mapping) -> Result<Settings> {
    let (file_defaults, file_mount) =
        read_configuration_file(&util::expand_path(config_file), mount_point)?;

    let mut merged: Value = serde_yaml::from_str(BUILT_IN_DEFAULTS)?;
    merge_value(&mut merged, file_defaults);
    merge_value(&mut merged, file_mount);
    merge_value(&mut merged, Value::Mapping(overrides));

    let no_input = merged
        .get("no-input")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let missing: Vec<(&str, &str)> = REQUIRED_SETTINGS
        .iter()
        .copied()
        .filter(|(field, _)| merged.get(field).is_none())
        .collect();

    if !missing.is_empty() {
        if no_input {
            return Err(ConfigError::Missing {
                fields: missing.iter().map(|(field, _)| field.to_string()).collect(),
            });
        }

        request_missing_settings(&mut merged, &missing)?;
    }

    Ok(serde_yaml::from_value(merged)?)
}

/// Settings layers from the YAML file at `path`: the `defaults` section
/// and the section for the selected mount point. A missing file is the
/// same as an empty one.
fn read_configuration_file(path: &Path, mount_point: &Path) -> Result<(Value, Value)> {
    let empty = || Value::Mapping(Mapping::new());

    if !path.exists() {
        return Ok((empty(), empty()));
    }

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    let defaults = parsed.get("defaults").cloned().unwrap_or_else(empty);

    // Mount-point sections are keyed by path; expand before comparing
    // against the selected mount point, which is already expanded.
    let mut selected = empty();
    if let Some(Value::Mapping(sections)) = parsed.get("mount-points") {
        for (key, section) in sections {
            let Some(key) = key.as_str() else { continue };
            if util::expand_path(key) == mount_point {
                selected = section.clone();
                break;
            }
        }
    }

    Ok((defaults, selected))
}

/// Recursively merge `overlay` into `base`: mappings merge key by key,
/// anything else overwrites.
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Ask the user for the missing required settings on the controlling
/// terminal. The secret key is read with echo disabled.
fn request_missing_settings(merged: &mut Value, missing: &[(&str, &str)]) -> Result<()> {
    for (field, prompt) in missing {
        let answer = if *field == "secret-key" {
            rpassword::prompt_password(prompt)?
        } else {
            prompt_line(prompt)?
        };

        if let Value::Mapping(merged) = merged {
            merged.insert(
                Value::String(field.to_string()),
                Value::String(answer),
            );
        }
    }

    Ok(())
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    let mut out = io::stdout();
    out.write_all(prompt.as_bytes())?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim_end_matches(&['\r', '\n'][..]).to_string())
}
