//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`    : 数据模型（PartState / DownloadReport / ProgressEvent）
//! - `progress`  : 进度上报与 CLI 进度行
//! - `engine`    : 分段下载与跳过逻辑
//! - `cover`     : 封面下载
//! - `downloader`: 下载主流程编排

pub mod cover;
pub mod downloader;
pub mod engine;
pub mod models;
pub mod progress;
