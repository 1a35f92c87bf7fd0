//! 封面下载。封面只是附带品：网络层面的任何失败都只记日志，不影响有声书本身。

use std::fs;
use std::path::Path;

use reqwest::header::USER_AGENT as USER_AGENT_HEADER;
use tracing::{debug, info, warn};

use crate::base_system::error::{DownloadError, DownloadResult};
use crate::network::client::{HttpClient, USER_AGENT_LONG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverOutcome {
    Saved,
    AlreadyPresent,
    /// 清单未声明封面，或服务端取不到。
    Unavailable,
}

pub fn fetch_cover(
    http: &HttpClient,
    cover_url: Option<&str>,
    dest: &Path,
    force_overwrite: bool,
) -> DownloadResult<CoverOutcome> {
    let Some(url) = cover_url else {
        debug!("清单未声明封面");
        return Ok(CoverOutcome::Unavailable);
    };
    if dest.is_file() && !force_overwrite {
        info!("封面已存在: {}", dest.display());
        return Ok(CoverOutcome::AlreadyPresent);
    }

    info!("正在下载封面");
    let bytes = match request_cover(http, url) {
        Ok(bytes) => bytes,
        Err(reason) => {
            warn!("封面下载失败 ({url}): {reason}");
            return Ok(CoverOutcome::Unavailable);
        }
    };

    fs::write(dest, &bytes).map_err(|e| DownloadError::fs(dest, e))?;
    debug!("封面已保存: {} ({} 字节)", dest.display(), bytes.len());
    Ok(CoverOutcome::Saved)
}

fn request_cover(http: &HttpClient, url: &str) -> Result<Vec<u8>, String> {
    let resp = http
        .inner()
        .get(url)
        .header(USER_AGENT_HEADER, USER_AGENT_LONG)
        .timeout(http.request_timeout())
        .send()
        .map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("server answered {status}"));
    }
    resp.bytes().map(|b| b.to_vec()).map_err(|e| e.to_string())
}
