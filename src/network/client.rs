//! 阻塞式 HTTP 客户端与 OverDrive 客户端标识。

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue};

use crate::base_system::context::Config;

/// License 请求与分段下载使用的 User-Agent。
pub const USER_AGENT: &str = "OverDrive Media Console";
/// 封面请求使用的长 User-Agent。
pub const USER_AGENT_LONG: &str =
    "OverDrive Media Console (unknown version)CFNetwork/976 Darwin/18.2.0 (x86_64)";

/// 网络参数。分段下载可能持续数十分钟，因此客户端本身不设总超时，
/// 只有 License/封面这类短请求在请求级别带上 `request_timeout`。
#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    options: HttpOptions,
}

impl HttpClient {
    pub fn new(options: HttpOptions) -> reqwest::Result<Self> {
        // 不启用解压：content-length 必须与落盘字节数一致。
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout)
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { client, options })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn request_timeout(&self) -> Duration {
        self.options.request_timeout
    }
}
