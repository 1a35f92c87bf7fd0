//! 下载流程的致命错误分类。
//!
//! 所有变体都是致命的：出现即终止本次运行，进程内不做任何重试。
//! 断点续传只依赖下一次运行时的“文件存在且大小一致”检查。

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// `.odm` 清单缺失、格式错误或前后不一致。
    #[error("bad ODM file: {0}")]
    ManifestFormat(String),
    /// 凭据错误、服务端拒绝、License 文件损坏。
    #[error("license acquisition failed: {0}")]
    LicenseAcquisition(String),
    /// 分段下载中断：缺少 content-length、状态码异常、连接提前断开。
    #[error("failed to download {part}: {reason}")]
    DownloadTransport { part: String, reason: String },
    #[error("filesystem error at {path}: {source}")]
    Filesystem { path: PathBuf, source: io::Error },
}

impl DownloadError {
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::ManifestFormat(msg.into())
    }

    pub fn license(msg: impl Into<String>) -> Self {
        Self::LicenseAcquisition(msg.into())
    }

    pub fn transport(part: impl Into<String>, reason: impl ToString) -> Self {
        Self::DownloadTransport {
            part: part.into(),
            reason: reason.to_string(),
        }
    }

    /// 底层错误（reqwest/hyper/io）逐层展开作为原因，避免只剩最外层的笼统描述。
    pub fn transport_source(part: impl Into<String>, err: &(dyn StdError + 'static)) -> Self {
        Self::transport(part, describe_chain(err))
    }

    pub fn fs(path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// `outer: cause: root cause`，相邻重复的描述只保留一次。
pub fn describe_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        let msg = e.to_string();
        if parts.last() != Some(&msg) {
            parts.push(msg);
        }
        current = e.source();
    }
    parts.join(": ")
}
