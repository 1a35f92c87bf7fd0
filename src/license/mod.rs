//! 设备标识与 License 获取。
//!
//! - `device` : 持久化的 ClientID 与请求签名
//! - `acquire`: License 请求、保存与复用

pub mod acquire;
pub mod device;
