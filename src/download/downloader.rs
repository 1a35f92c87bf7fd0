//! 下载主流程编排：校验清单 → 解析 → 获取 License → 下载分段与封面 → 标签/属主后处理。

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use super::cover::{CoverOutcome, fetch_cover};
use super::engine::DownloadEngine;
use super::models::DownloadReport;
use super::progress::ProgressSink;
use crate::base_system::book_paths::DownloadTarget;
use crate::base_system::context::Config;
use crate::base_system::error::{DownloadError, DownloadResult};
use crate::license::acquire::LicenseAcquirer;
use crate::license::device::DeviceIdentity;
use crate::network::client::HttpClient;
use crate::odm_parser::manifest::{Manifest, verify_odm_file};
use crate::post_process::owner::{OwnershipSetter, apply_owner};
use crate::post_process::tags::TagWriter;

#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadOptions {
    pub force_overwrite: bool,
    pub update_tags: bool,
    pub update_owner: bool,
}

pub struct Downloader<'a> {
    config: &'a Config,
    http: &'a HttpClient,
    identity: DeviceIdentity,
    tags: &'a dyn TagWriter,
    owner: &'a dyn OwnershipSetter,
}

impl<'a> Downloader<'a> {
    pub fn new(
        config: &'a Config,
        http: &'a HttpClient,
        identity: DeviceIdentity,
        tags: &'a dyn TagWriter,
        owner: &'a dyn OwnershipSetter,
    ) -> Self {
        Self {
            config,
            http,
            identity,
            tags,
            owner,
        }
    }

    pub fn download_audiobook(
        &self,
        odm_path: &Path,
        options: DownloadOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadReport> {
        let (manifest, target) = self.load_manifest(odm_path)?;
        info!("作者: {}  书名: {}", manifest.author, manifest.title);

        let license = LicenseAcquirer::new(self.http, self.identity.clone())
            .acquire_or_reuse(odm_path, &manifest)?;

        fs::create_dir_all(&target.directory)
            .map_err(|e| DownloadError::fs(&target.directory, e))?;
        info!("保存目录: {}", target.directory.display());

        let report = DownloadEngine::new(self.http, progress).run(
            &manifest,
            &license,
            &target,
            options.force_overwrite,
        )?;
        info!(
            "分段下载完成：新下载 {} 个，跳过 {} 个",
            report.completed(),
            report.skipped()
        );

        match fetch_cover(
            self.http,
            manifest.cover_url.as_deref(),
            &target.cover_path,
            options.force_overwrite,
        )? {
            CoverOutcome::Saved => info!("封面已保存: {}", target.cover_path.display()),
            CoverOutcome::AlreadyPresent | CoverOutcome::Unavailable => {}
        }

        self.post_process(&target, options)?;
        Ok(report)
    }

    /// 不联网：只对已下载好的文件做标签/属主更新。
    pub fn process_existing(&self, odm_path: &Path, options: DownloadOptions) -> Result<()> {
        let (_, target) = self.load_manifest(odm_path)?;
        ensure_files_present(&target)?;
        self.post_process(&target, options)
    }

    fn load_manifest(&self, odm_path: &Path) -> Result<(Manifest, DownloadTarget)> {
        verify_odm_file(odm_path)?;
        let manifest = Manifest::from_file(odm_path, self.config.filenames_lowercase)?;
        let target = DownloadTarget::resolve(&self.config.download_root(), &manifest);
        debug!("目标路径: {:?}", target);
        Ok((manifest, target))
    }

    fn post_process(&self, target: &DownloadTarget, options: DownloadOptions) -> Result<()> {
        if options.update_tags {
            info!("正在更新 ID3 标签");
            for path in &target.part_paths {
                self.tags
                    .write_tags(path, &self.config.tags)
                    .with_context(|| format!("update tags of {}", path.display()))?;
            }
        }

        if options.update_owner {
            match &self.config.owner {
                Some(owner) => {
                    info!("正在更新文件属主");
                    apply_owner(self.owner, owner, target).context("update owner")?;
                }
                None => error!("配置中没有 owner 项，无法更新属主"),
            }
        }
        Ok(())
    }
}

/// 跳过下载时要求书名目录与全部分段都已存在。
pub fn ensure_files_present(target: &DownloadTarget) -> DownloadResult<()> {
    if !target.directory.is_dir() {
        return Err(DownloadError::fs(
            &target.directory,
            io::Error::new(io::ErrorKind::NotFound, "download directory does not exist"),
        ));
    }
    for path in &target.part_paths {
        if !path.is_file() {
            return Err(DownloadError::fs(
                path,
                io::Error::new(io::ErrorKind::NotFound, "part file does not exist"),
            ));
        }
    }
    Ok(())
}
