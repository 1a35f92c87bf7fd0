//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 保存配置
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_true")]
    pub filenames_lowercase: bool,

    // 后处理配置
    #[serde(default = "default_tags")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub owner: Option<OwnerConfig>,

    // 网络配置
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// 下载完成后要设置的文件属主（按名称）。留空表示不修改。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerConfig {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            filenames_lowercase: default_true(),
            tags: default_tags(),
            owner: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 6] = [
            FieldMeta {
                name: "download_dir",
                description: "有声书保存根目录，支持 ~ 表示家目录",
            },
            FieldMeta {
                name: "filenames_lowercase",
                description: "作者/书名目录是否统一转为小写",
            },
            FieldMeta {
                name: "tags",
                description: "使用 --tags 时写入每个分段的 ID3 标签\n可用键: genre, artist, album, albumartist, title, composer, date, tracknumber, comment, publisher",
            },
            FieldMeta {
                name: "owner",
                description: "使用 --owner 时设置的文件属主, 例如 {user: deg, group: media}",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "License/封面请求超时时间（秒），分段下载不受此限制",
            },
        ];
        &FIELDS
    }
}

impl Config {
    /// 展开 `~` 后的保存根目录；相对路径按当前目录解析。
    pub fn download_root(&self) -> PathBuf {
        let expanded = expand_home(self.download_dir.trim());
        if expanded.is_absolute() {
            return expanded;
        }
        std::path::absolute(&expanded).unwrap_or(expanded)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }
}

pub fn expand_home(raw: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (raw, home) {
        ("~", Some(home)) => home,
        (s, Some(home)) if s.starts_with("~/") => home.join(&s[2..]),
        (s, _) => PathBuf::from(s),
    }
}

/// 默认数据目录：存放 config.yml 与 logs。
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("overdrive-dl"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_data_dir)
}

fn default_true() -> bool {
    true
}

fn default_download_dir() -> String {
    "~/Documents/audiobooks/".to_string()
}

fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([("genre".to_string(), "Audiobook".to_string())])
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}
