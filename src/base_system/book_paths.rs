//! 有声书落盘路径：`root/author/title/partNN.mp3` 与 `root/author/title/title.jpg`。
//!
//! 作者/书名按原样拼接，不做冲突检测：大小写折叠后同名的两本书会写进同一目录。

use std::path::{Path, PathBuf};

use crate::odm_parser::manifest::Manifest;

pub fn download_dir(root: &Path, author: &str, title: &str) -> PathBuf {
    root.join(author).join(title)
}

pub fn part_file_name(number: u32) -> String {
    format!("part{number:02}.mp3")
}

pub fn part_path(download_dir: &Path, number: u32) -> PathBuf {
    download_dir.join(part_file_name(number))
}

pub fn cover_path(download_dir: &Path, title: &str) -> PathBuf {
    download_dir.join(format!("{title}.jpg"))
}

/// 某个清单对应的全部目标路径。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub directory: PathBuf,
    /// 与 `Manifest::parts` 同序。
    pub part_paths: Vec<PathBuf>,
    pub cover_path: PathBuf,
}

impl DownloadTarget {
    pub fn resolve(root: &Path, manifest: &Manifest) -> Self {
        let directory = download_dir(root, &manifest.author, &manifest.title);
        let part_paths = manifest
            .parts
            .iter()
            .map(|p| part_path(&directory, p.number))
            .collect();
        let cover_path = cover_path(&directory, &manifest.title);
        Self {
            directory,
            part_paths,
            cover_path,
        }
    }

    /// 作者目录（标题目录的上一级）。
    pub fn author_dir(&self) -> Option<&Path> {
        self.directory.parent()
    }
}
