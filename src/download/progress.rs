//! 进度上报与 CLI 进度行。

use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::Print;

use super::models::ProgressEvent;

/// 进度事件的接收方。闭包也可以直接作为 sink 使用。
pub trait ProgressSink {
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressEvent),
{
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// 丢弃所有进度。
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _event: &ProgressEvent) {}
}

/// `[40.00%] 4096 / 10240  2.0s/5.0s  2048.00B/s    3.0s eta`
pub fn format_progress_line(ev: &ProgressEvent) -> String {
    format!(
        "[{:.2}%] {} / {}  {:.1}s/{:.1}s  {:.2}B/s    {:.1}s eta",
        ev.percent,
        ev.downloaded,
        ev.total,
        ev.elapsed,
        ev.estimated_total,
        ev.average_speed,
        ev.eta
    )
}

/// 终端渲染：同一分段的后续进度行回到行首覆盖上一行，最后一块换行收尾。
pub struct ConsoleProgress<W: Write> {
    out: W,
}

impl ConsoleProgress<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, ev: &ProgressEvent) -> io::Result<()> {
        if !ev.is_first() {
            queue!(self.out, MoveToColumn(0))?;
        }
        queue!(self.out, Print(format_progress_line(ev)))?;
        if ev.is_last() {
            queue!(self.out, Print("\n"))?;
        }
        self.out.flush()
    }
}

impl<W: Write> ProgressSink for ConsoleProgress<W> {
    fn on_progress(&mut self, event: &ProgressEvent) {
        // 进度输出失败（例如 stdout 被关闭）不影响下载本身
        let _ = self.render(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn line_format_matches_console_layout() {
        let ev = ProgressEvent::measure(1, 3, 4096, 10240, Duration::from_secs(2));
        assert_eq!(
            format_progress_line(&ev),
            "[40.00%] 4096 / 10240  2.0s/5.0s  2048.00B/s    3.0s eta"
        );
    }

    #[test]
    fn console_overwrites_then_terminates_line() {
        let mut console = ConsoleProgress::new(Vec::new());
        console.on_progress(&ProgressEvent::measure(1, 0, 1024, 2048, Duration::from_secs(1)));
        console.on_progress(&ProgressEvent::measure(1, 1, 2048, 2048, Duration::from_secs(2)));
        let out = String::from_utf8(console.into_inner()).unwrap();

        assert!(out.starts_with("[50.00%] 1024 / 2048"));
        let (first, rest) = out.split_once("\x1b[").unwrap();
        assert!(!first.contains('\n'));
        assert!(rest.starts_with("1G[100.00%] 2048 / 2048"));
        assert!(out.ends_with("0.0s eta\n"));
        assert_eq!(out.matches('\n').count(), 1);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |ev: &ProgressEvent| seen.push(ev.downloaded);
            let sink: &mut dyn ProgressSink = &mut sink;
            sink.on_progress(&ProgressEvent::measure(1, 0, 10, 20, Duration::from_secs(1)));
        }
        assert_eq!(seen, vec![10]);
    }
}
