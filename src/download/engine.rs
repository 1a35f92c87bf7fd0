//! 分段下载引擎：按清单顺序逐个下载，已存在且大小一致的分段直接跳过。

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT as USER_AGENT_HEADER};
use tracing::{debug, info};

use super::models::{DownloadReport, PartOutcome, PartState, ProgressEvent};
use super::progress::ProgressSink;
use crate::base_system::book_paths::DownloadTarget;
use crate::base_system::error::{DownloadError, DownloadResult};
use crate::license::acquire::License;
use crate::network::client::{HttpClient, USER_AGENT};
use crate::odm_parser::manifest::{Manifest, PartDescriptor};

pub const CHUNK_SIZE: usize = 1024;

pub struct DownloadEngine<'a> {
    http: &'a HttpClient,
    progress: &'a mut dyn ProgressSink,
}

impl<'a> DownloadEngine<'a> {
    pub fn new(http: &'a HttpClient, progress: &'a mut dyn ProgressSink) -> Self {
        Self { http, progress }
    }

    pub fn run(
        &mut self,
        manifest: &Manifest,
        license: &License,
        target: &DownloadTarget,
        force_overwrite: bool,
    ) -> DownloadResult<DownloadReport> {
        let headers = auth_headers(license)?;
        let total_parts = manifest.parts.len();
        let mut report = DownloadReport::default();

        info!("共 {} 个分段待下载", total_parts);
        for (part, path) in manifest.parts.iter().zip(&target.part_paths) {
            info!("正在下载 {} / 共 {} 段", part.name, total_parts);
            debug!(
                "Filename: {}, Filesize: {}, Duration: {}",
                part.filename, part.size_bytes, part.duration
            );

            let state = plan_part(part, path, force_overwrite);
            debug!(part = part.number, "{:?} -> {:?}", PartState::Pending, state);
            if state == PartState::Skipped {
                info!("跳过 {}", part.name);
                report.parts.push(outcome(part, path, PartState::Skipped, part.size_bytes));
                continue;
            }

            let url = format!("{}/{}", manifest.base_url, part.filename);
            match self.download_part(&url, &headers, part, path) {
                Ok(bytes) => {
                    debug!(part = part.number, "InProgress -> Complete ({bytes} bytes)");
                    report.parts.push(outcome(part, path, PartState::Complete, bytes));
                }
                Err(err) => {
                    debug!(part = part.number, state = ?PartState::Failed, "InProgress -> Failed");
                    return Err(err);
                }
            }
        }

        Ok(report)
    }

    fn download_part(
        &mut self,
        url: &str,
        headers: &HeaderMap,
        part: &PartDescriptor,
        path: &Path,
    ) -> DownloadResult<u64> {
        let mut resp = self
            .http
            .inner()
            .get(url)
            .headers(headers.clone())
            .send()
            .map_err(|e| DownloadError::transport_source(&part.name, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::transport(
                &part.name,
                format!("server answered {status}"),
            ));
        }
        let total = resp.content_length().ok_or_else(|| {
            DownloadError::transport(&part.name, "response has no content-length")
        })?;

        let file = File::create(path).map_err(|e| DownloadError::fs(path, e))?;
        let mut writer = BufWriter::new(file);
        let mut buf = [0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        let mut chunk_index = 0usize;
        let start = Instant::now();

        loop {
            let (n, read_result) = read_chunk(&mut resp, &mut buf);
            if n > 0 {
                writer
                    .write_all(&buf[..n])
                    .map_err(|e| DownloadError::fs(path, e))?;
                downloaded += n as u64;

                let event = ProgressEvent::measure(
                    part.number,
                    chunk_index,
                    downloaded,
                    total,
                    start.elapsed(),
                );
                self.progress.on_progress(&event);
                chunk_index += 1;
            }
            if let Err(err) = read_result {
                writer.flush().map_err(|e| DownloadError::fs(path, e))?;
                debug!("{} 中断，已写入 {downloaded} / {total} 字节", part.name);
                return Err(DownloadError::transport_source(&part.name, &err));
            }
            if n == 0 {
                break;
            }
        }
        writer.flush().map_err(|e| DownloadError::fs(path, e))?;

        if downloaded < total {
            return Err(DownloadError::transport(
                &part.name,
                format!("connection closed after {downloaded} of {total} bytes"),
            ));
        }
        Ok(downloaded)
    }
}

/// 已存在且大小等于声明值的文件视为已完成；大小不符的文件照常重新下载并覆盖。
fn plan_part(part: &PartDescriptor, path: &Path, force_overwrite: bool) -> PartState {
    if !file_has_size(path, part.size_bytes) {
        return PartState::InProgress;
    }
    info!(
        "{} 已存在且大小符合预期 {:.2}MB: {}",
        part.name,
        part.size_bytes as f64 / (1024.0 * 1024.0),
        path.display()
    );
    if force_overwrite {
        info!("覆盖文件 {}", path.display());
        PartState::InProgress
    } else {
        PartState::Skipped
    }
}

pub(crate) fn file_has_size(path: &Path, expected: u64) -> bool {
    let matches = fs::metadata(path)
        .map(|m| m.is_file() && m.len() == expected)
        .unwrap_or(false);
    debug!(
        "文件 \"{}\" 存在且大小为 {} 字节? {}",
        path.display(),
        expected,
        matches
    );
    matches
}

fn auth_headers(license: &License) -> DownloadResult<HeaderMap> {
    let value = |raw: &str, what: &str| {
        HeaderValue::from_str(raw).map_err(|_| {
            DownloadError::license(format!("{what} cannot be sent as a request header"))
        })
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("license"),
        value(&license.raw, "license document")?,
    );
    headers.insert(
        HeaderName::from_static("clientid"),
        value(&license.client_id, "ClientID")?,
    );
    headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));
    Ok(headers)
}

/// 读满一个块（或读到 EOF），保证除最后一块外每块都是 `CHUNK_SIZE` 字节。
///
/// 出错时同时返回出错前已读入 `buf` 的字节数，调用方先落盘再报错。
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> (usize, io::Result<()>) {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Err(e)),
        }
    }
    (filled, Ok(()))
}

fn outcome(part: &PartDescriptor, path: &Path, state: PartState, bytes: u64) -> PartOutcome {
    PartOutcome {
        number: part.number,
        name: part.name.clone(),
        path: path.to_path_buf(),
        state,
        bytes,
    }
}
