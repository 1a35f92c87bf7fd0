//! 下载相关的数据模型定义。
//!
//! 包含分段状态、下载报告、进度事件等核心数据结构。

use std::path::PathBuf;
use std::time::Duration;

/// 单个分段的状态机：
///
/// `Pending → Skipped`（已存在且大小一致、未强制覆盖）
/// `Pending → InProgress → Complete | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    Skipped,
    InProgress,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutcome {
    pub number: u32,
    pub name: String,
    pub path: PathBuf,
    /// 只会是 `Skipped` 或 `Complete`；失败会直接终止整次运行。
    pub state: PartState,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub parts: Vec<PartOutcome>,
}

impl DownloadReport {
    pub fn completed(&self) -> usize {
        self.count(PartState::Complete)
    }

    pub fn skipped(&self) -> usize {
        self.count(PartState::Skipped)
    }

    fn count(&self, state: PartState) -> usize {
        self.parts.iter().filter(|p| p.state == state).count()
    }
}

/// 每写完一个块就发出一次的进度事件。
///
/// 速率按“整段传输的平均值”计算（已下载字节 / 已用时间），每块都从头重算，
/// 预计总耗时 = 总字节 / 平均速率，剩余时间 = 剩余字节 / 平均速率。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub part_number: u32,
    /// 本分段内的块序号，从 0 开始。
    pub chunk_index: usize,
    pub downloaded: u64,
    pub total: u64,
    pub percent: f64,
    /// 秒
    pub elapsed: f64,
    /// 秒
    pub estimated_total: f64,
    /// 字节/秒
    pub average_speed: f64,
    /// 秒
    pub eta: f64,
}

// 首块可能在计时器分辨率内完成，避免除零。
const MIN_ELAPSED_SECS: f64 = 1e-6;

impl ProgressEvent {
    pub fn measure(
        part_number: u32,
        chunk_index: usize,
        downloaded: u64,
        total: u64,
        elapsed: Duration,
    ) -> Self {
        let elapsed = elapsed.as_secs_f64().max(MIN_ELAPSED_SECS);
        let average_speed = downloaded as f64 / elapsed;
        let (estimated_total, eta) = if average_speed > 0.0 {
            (
                total as f64 / average_speed,
                total.saturating_sub(downloaded) as f64 / average_speed,
            )
        } else {
            (0.0, 0.0)
        };
        let percent = if total == 0 {
            100.0
        } else {
            downloaded as f64 / total as f64 * 100.0
        };

        Self {
            part_number,
            chunk_index,
            downloaded,
            total,
            percent,
            elapsed,
            estimated_total,
            average_speed,
            eta,
        }
    }

    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }

    pub fn is_last(&self) -> bool {
        self.downloaded >= self.total
    }
}
