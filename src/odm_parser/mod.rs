//! `.odm` 清单解析。

pub mod manifest;
