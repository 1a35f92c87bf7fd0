//! 设备标识（ClientID）与 License 请求签名。

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use tracing::debug;
use uuid::Uuid;

use crate::base_system::error::{DownloadError, DownloadResult};

/// OverDrive Media Console 版本号。
pub const OMC: &str = "1.2.0";
/// 客户端声明的系统版本。
pub const OS: &str = "10.14.2";
const HASH_SECRET: &str = "ELOSNOC*AIDEM*EVIRDREVO";
const CLIENT_ID_FILE: &str = ".overdrive-dl.clientid";

/// 持久化在固定路径上的设备标识。首次使用时生成，此后永不轮换。
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    path: PathBuf,
}

impl DeviceIdentity {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.overdrive-dl.clientid`
    pub fn default_location() -> DownloadResult<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            DownloadError::fs(
                Path::new("~"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found"),
            )
        })?;
        Ok(Self::at(home.join(CLIENT_ID_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取已保存的 ClientID（原样返回，不校验格式）；文件不存在时生成大写 UUIDv4 并写入。
    pub fn client_id(&self) -> DownloadResult<String> {
        if self.path.is_file() {
            return fs::read_to_string(&self.path).map_err(|e| DownloadError::fs(&self.path, e));
        }

        let client_id = Uuid::new_v4().hyphenated().to_string().to_uppercase();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::fs(parent, e))?;
        }
        fs::write(&self.path, &client_id).map_err(|e| DownloadError::fs(&self.path, e))?;
        debug!("生成新的 ClientID 并保存到 {}", self.path.display());
        Ok(client_id)
    }
}

/// `base64(sha1(utf16le("client_id|omc|os|secret")))`
///
/// 服务端按 UTF-16LE（无 BOM）校验该摘要，换成 UTF-8 会被拒绝。
pub fn auth_hash(client_id: &str, omc: &str, os: &str) -> String {
    let raw = [client_id, omc, os, HASH_SECRET].join("|");
    let encoded: Vec<u8> = raw.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(Sha1::digest(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_known_vectors() {
        assert_eq!(
            auth_hash("00000000-0000-0000-0000-000000000000", OMC, OS),
            "Y/FyR6Zq9Iu2GqYbNPzmvqgnwP0="
        );
        assert_eq!(
            auth_hash("3F2504E0-4F89-41D3-9A0C-0305E82C3301", OMC, OS),
            "2M1gf8OCRYWgyQuAmVBx//3Zd3E="
        );
    }

    #[test]
    fn hash_is_deterministic_and_input_sensitive() {
        let base = "3F2504E0-4F89-41D3-9A0C-0305E82C3301";
        assert_eq!(auth_hash(base, OMC, OS), auth_hash(base, OMC, OS));

        let mut seen = std::collections::HashSet::new();
        seen.insert(auth_hash(base, OMC, OS));
        for (i, ch) in base.char_indices().filter(|(_, c)| c.is_ascii_hexdigit()) {
            let flipped = if ch == '0' { '1' } else { '0' };
            let mut variant = base.to_string();
            variant.replace_range(i..i + 1, &flipped.to_string());
            assert!(seen.insert(auth_hash(&variant, OMC, OS)), "collision at {i}");
        }
        assert_ne!(auth_hash(base, OMC, "10.14.3"), auth_hash(base, OMC, OS));
    }

    #[test]
    fn client_id_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::at(dir.path().join("clientid"));

        let first = identity.client_id().unwrap();
        assert_eq!(first.len(), 36);
        assert_eq!(first, first.to_uppercase());
        assert!(Uuid::parse_str(&first).is_ok());

        let second = identity.client_id().unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(identity.path()).unwrap(), first);
    }

    #[test]
    fn persisted_value_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clientid");
        fs::write(&path, "not-a-uuid\n").unwrap();
        assert_eq!(DeviceIdentity::at(&path).client_id().unwrap(), "not-a-uuid\n");
    }
}
