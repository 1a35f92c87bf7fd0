//! 下载完成后的可选处理：ID3 标签与文件属主。

pub mod owner;
pub mod tags;
