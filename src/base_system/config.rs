//! 配置文件读写与带注释生成。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn fields() -> &'static [FieldMeta];
}

/// 配置文件来源。
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// `--config` 指定的文件，必须已存在，不会被改写。
    Explicit(PathBuf),
    /// 数据目录下的默认文件，不存在时写入带注释的默认配置。
    DataDir(PathBuf),
}

impl ConfigSource {
    pub fn from_args(explicit: Option<&Path>, data_dir: &Path) -> Self {
        match explicit {
            Some(p) => Self::Explicit(p.to_path_buf()),
            None => Self::DataDir(data_dir.to_path_buf()),
        }
    }
}

/// Load a config file, merging user values over `T::default()`.
///
/// # Path resolution
/// - `Explicit(path)`: the file must exist; a missing file is an error
/// - `DataDir(dir)`: uses `dir/FILE_NAME`, created with commented defaults when
///   absent and refreshed when the user file lacks some fields
pub fn load<T: ConfigSpec>(source: &ConfigSource) -> Result<(T, PathBuf), ConfigError> {
    match source {
        ConfigSource::Explicit(path) => {
            if !path.is_file() {
                return Err(ConfigError::Missing(path.clone()));
            }
            let (config, _) = read_merged::<T>(path)?;
            Ok((config, path.clone()))
        }
        ConfigSource::DataDir(dir) => {
            let path = dir.join(T::FILE_NAME);
            if !path.exists() {
                let default_config = T::default();
                write_with_comments(&default_config, &path)?;
                info!("已生成默认配置文件: {}", path.display());
                return Ok((default_config, path));
            }
            let (config, missing_fields) = read_merged::<T>(&path)?;
            if missing_fields {
                debug!("配置文件缺少字段，补全后写回: {}", path.display());
                write_with_comments(&config, &path)?;
            }
            Ok((config, path))
        }
    }
}

fn read_merged<T: ConfigSpec>(path: &Path) -> Result<(T, bool), ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let user_yaml: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let missing_fields = has_missing_fields::<T>(&user_yaml);

    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    merge_values(&mut merged, user_yaml);

    let config: T =
        serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))?;
    Ok((config, missing_fields))
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let yaml = generate_yaml_with_comments(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn generate_yaml_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let Value::Mapping(mapping) =
        serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))?
    else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut blocks = Vec::new();
    for field in T::fields() {
        let mut block = String::new();
        if !field.description.is_empty() {
            block.push_str(&format!("# {}\n", field.description.replace('\n', "\n# ")));
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let entry = serde_yaml::to_string(&serde_yaml::Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        block.push_str(entry.trim_end());
        blocks.push(block);
    }

    Ok(blocks.join("\n") + "\n")
}

fn has_missing_fields<T: ConfigSpec>(user_yaml: &Value) -> bool {
    let Value::Mapping(map) = user_yaml else {
        return true;
    };
    T::fields()
        .iter()
        .any(|field| !map.contains_key(Value::String(field.name.to_string())))
}

// 用户映射覆盖默认值；`tags` 这类映射整体替换，避免用户删掉的默认标签又被合并回来。
fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                match dest.get_mut(&key) {
                    Some(dest_val) if dest_val.is_mapping() && !is_free_form(&key) => {
                        merge_values(dest_val, user_val)
                    }
                    _ => {
                        dest.insert(key, user_val);
                    }
                }
            }
        }
        (dest, other) => {
            *dest = other;
        }
    }
}

fn is_free_form(key: &Value) -> bool {
    key.as_str() == Some("tags")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::context::{Config, OwnerConfig};

    #[test]
    fn creates_commented_default_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, path) = load::<Config>(&ConfigSource::DataDir(dir.path().to_path_buf())).unwrap();
        assert_eq!(path, dir.path().join("config.yml"));
        assert!(cfg.filenames_lowercase);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("# 有声书保存根目录"));
        assert!(written.contains("download_dir:"));
        assert!(written.contains("Documents/audiobooks/"));
    }

    #[test]
    fn user_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "download_dir: /srv/books\ntags:\n  album: Library\nowner:\n  user: deg\n",
        )
        .unwrap();

        let (cfg, _) = load::<Config>(&ConfigSource::Explicit(path.clone())).unwrap();
        assert_eq!(cfg.download_dir, "/srv/books");
        assert_eq!(cfg.tags.len(), 1);
        assert_eq!(cfg.tags.get("album").map(String::as_str), Some("Library"));
        assert_eq!(
            cfg.owner,
            Some(OwnerConfig {
                user: Some("deg".to_string()),
                group: None,
            })
        );
        assert!(cfg.filenames_lowercase);

        // explicit files are never rewritten
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("connect_timeout"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load::<Config>(&ConfigSource::Explicit(dir.path().join("nope.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn data_dir_file_is_completed_with_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "filenames_lowercase: false\n").unwrap();

        let (cfg, _) = load::<Config>(&ConfigSource::DataDir(dir.path().to_path_buf())).unwrap();
        assert!(!cfg.filenames_lowercase);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("filenames_lowercase: false"));
        assert!(raw.contains("request_timeout: 30"));
    }
}
