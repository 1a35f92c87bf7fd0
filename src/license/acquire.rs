//! License 获取与复用。
//!
//! 同一清单只获取一次 License：获取成功后原样保存到 `<清单路径>.license`，
//! 之后的运行直接信任该文件，不做过期检查也不回源校验。

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use reqwest::header::USER_AGENT as USER_AGENT_HEADER;
use tracing::{debug, info};

use super::device::{DeviceIdentity, OMC, OS, auth_hash};
use crate::base_system::error::{DownloadError, DownloadResult};
use crate::network::client::{HttpClient, USER_AGENT};
use crate::odm_parser::manifest::Manifest;

pub const LICENSE_NS: &str = "http://license.overdrive.com/2008/03/License.xsd";
const SIDECAR_SUFFIX: &str = ".license";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    /// 服务端返回的完整 License 文档，下载分段时原样作为 `License` 请求头。
    pub raw: String,
    /// `SignedInfo/ClientID`
    pub client_id: String,
}

impl License {
    pub fn from_document(raw: String) -> DownloadResult<Self> {
        if raw.is_empty() {
            return Err(DownloadError::license("missing license content"));
        }
        let client_id = extract_client_id(&raw)?;
        Ok(Self { raw, client_id })
    }
}

pub fn sidecar_path(manifest_path: &Path) -> PathBuf {
    let mut name = OsString::from(manifest_path.as_os_str());
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

pub struct LicenseAcquirer<'a> {
    http: &'a HttpClient,
    identity: DeviceIdentity,
}

impl<'a> LicenseAcquirer<'a> {
    pub fn new(http: &'a HttpClient, identity: DeviceIdentity) -> Self {
        Self { http, identity }
    }

    pub fn acquire_or_reuse(
        &self,
        manifest_path: &Path,
        manifest: &Manifest,
    ) -> DownloadResult<License> {
        let sidecar = sidecar_path(manifest_path);
        let raw = if sidecar.is_file() {
            debug!("读取已有 License 文件: {}", sidecar.display());
            fs::read_to_string(&sidecar).map_err(|e| DownloadError::fs(&sidecar, e))?
        } else {
            let raw = self.request_license(manifest)?;
            debug!("写入 License 文件: {}", sidecar.display());
            fs::write(&sidecar, &raw).map_err(|e| DownloadError::fs(&sidecar, e))?;
            raw
        };

        let license = License::from_document(raw)?;
        debug!("使用 ClientID: {}", license.client_id);
        Ok(license)
    }

    fn request_license(&self, manifest: &Manifest) -> DownloadResult<String> {
        let url = manifest
            .acquisition_url
            .as_deref()
            .ok_or_else(|| DownloadError::license("ODM file has no License/AcquisitionUrl"))?;
        info!("正在获取 License");
        debug!("AcquisitionUrl: {url}, MediaID: {}", manifest.media_id);

        let client_id = self.identity.client_id()?;
        let hash = auth_hash(&client_id, OMC, OS);
        debug!("ClientID: {client_id}, Hash: {hash}");

        let resp = self
            .http
            .inner()
            .get(url)
            .query(&[
                ("MediaID", manifest.media_id.as_str()),
                ("ClientID", client_id.as_str()),
                ("OMC", OMC),
                ("OS", OS),
                ("Hash", hash.as_str()),
            ])
            .header(USER_AGENT_HEADER, USER_AGENT)
            .timeout(self.http.request_timeout())
            .send()
            .map_err(|e| DownloadError::license(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::license(format!(
                "server answered {status} for MediaID {}",
                manifest.media_id
            )));
        }
        resp.text()
            .map_err(|e| DownloadError::license(format!("could not read license body: {e}")))
    }
}

/// 取 `{LICENSE_NS}SignedInfo/{LICENSE_NS}ClientID`（均为根元素下的直接路径）。
pub fn extract_client_id(document: &str) -> DownloadResult<String> {
    let mut reader = NsReader::from_str(document);
    let mut depth = 0usize;
    let mut in_signed_info = false;
    let mut capture: Option<String> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                depth += 1;
                let bound = matches!(ns, ResolveResult::Bound(Namespace(n)) if n == LICENSE_NS.as_bytes());
                let local = e.local_name();
                match depth {
                    2 => in_signed_info = bound && local.as_ref() == b"SignedInfo",
                    3 if in_signed_info && bound && local.as_ref() == b"ClientID" => {
                        capture = Some(String::new());
                    }
                    _ => {}
                }
            }
            Ok((_, Event::Text(e))) => {
                if let Some(buf) = capture.as_mut() {
                    let text = e.unescape().map_err(|err| {
                        DownloadError::license(format!("malformed license document: {err}"))
                    })?;
                    buf.push_str(&text);
                }
            }
            Ok((_, Event::End(_))) => {
                if let Some(id) = capture.take() {
                    if !id.is_empty() {
                        return Ok(id);
                    }
                }
                if depth == 2 {
                    in_signed_info = false;
                }
                depth = depth.saturating_sub(1);
            }
            Ok((_, Event::Eof)) => break,
            Err(err) => {
                return Err(DownloadError::license(format!(
                    "malformed license document: {err}"
                )));
            }
            _ => {}
        }
    }

    Err(DownloadError::license("failed to extract ClientID from license"))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;

    use super::*;
    use crate::network::client::HttpOptions;
    use crate::odm_parser::manifest::tests::sample_odm;
    use crate::test_support::MockServer;

    pub(crate) fn sample_license(client_id: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?><License xmlns="http://license.overdrive.com/2008/03/License.xsd"><SignedInfo><ContentID>1A2B-3C4D</ContentID><ClientID>{client_id}</ClientID></SignedInfo><Signature>c2lnbmF0dXJl</Signature></License>"#
        )
    }

    fn manifest_for(server: &MockServer) -> Manifest {
        let doc = sample_odm(r#"<Creator role="Author">Jane Doe</Creator>"#, 1, &[(1, 10)])
            .replace(
                "https://license.example.com/AcquireLicense",
                &format!("{}/AcquireLicense", server.base),
            );
        Manifest::parse(doc.as_bytes(), false).unwrap()
    }

    #[derive(Default)]
    pub(crate) struct Seen {
        pub(crate) hits: AtomicUsize,
        query: Mutex<Option<HashMap<String, String>>>,
        user_agent: Mutex<Option<String>>,
    }

    pub(crate) fn license_server(status: StatusCode, body: String) -> (MockServer, Arc<Seen>) {
        let seen = Arc::new(Seen::default());
        let state = Arc::clone(&seen);
        let router = Router::new().route(
            "/AcquireLicense",
            get(move |Query(q): Query<HashMap<String, String>>, headers: HeaderMap| {
                let state = Arc::clone(&state);
                let body = body.clone();
                async move {
                    state.hits.fetch_add(1, Ordering::SeqCst);
                    *state.query.lock().unwrap() = Some(q);
                    *state.user_agent.lock().unwrap() = headers
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    (status, body)
                }
            }),
        );
        (MockServer::spawn(router), seen)
    }

    #[test]
    fn extracts_namespaced_client_id() {
        assert_eq!(extract_client_id(&sample_license("ABC-123")).unwrap(), "ABC-123");
    }

    #[test]
    fn ignores_client_id_outside_license_namespace() {
        let doc = "<License><SignedInfo><ClientID>X</ClientID></SignedInfo></License>";
        assert!(matches!(
            extract_client_id(doc),
            Err(DownloadError::LicenseAcquisition(_))
        ));
        let nested = format!(
            r#"<License xmlns="{LICENSE_NS}"><Other><SignedInfo><ClientID>X</ClientID></SignedInfo></Other></License>"#
        );
        assert!(extract_client_id(&nested).is_err());
    }

    #[test]
    fn sidecar_path_appends_suffix() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/book.odm")),
            PathBuf::from("/tmp/book.odm.license")
        );
    }

    #[test]
    fn existing_sidecar_is_reused_without_request() {
        let (server, seen) = license_server(StatusCode::OK, sample_license("FRESH"));
        let dir = tempfile::tempdir().unwrap();
        let odm = dir.path().join("book.odm");
        let stored = sample_license("STORED-ID");
        fs::write(sidecar_path(&odm), &stored).unwrap();

        let http = HttpClient::new(HttpOptions::default()).unwrap();
        let acquirer = LicenseAcquirer::new(&http, DeviceIdentity::at(dir.path().join("cid")));
        let license = acquirer.acquire_or_reuse(&odm, &manifest_for(&server)).unwrap();

        assert_eq!(license.raw, stored);
        assert_eq!(license.client_id, "STORED-ID");
        assert_eq!(seen.hits.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("cid").exists());
    }

    #[test]
    fn acquires_and_persists_license() {
        let body = sample_license("SESSION-42");
        let (server, seen) = license_server(StatusCode::OK, body.clone());
        let dir = tempfile::tempdir().unwrap();
        let odm = dir.path().join("book.odm");
        let identity = DeviceIdentity::at(dir.path().join("cid"));

        let http = HttpClient::new(HttpOptions::default()).unwrap();
        let acquirer = LicenseAcquirer::new(&http, identity.clone());
        let license = acquirer.acquire_or_reuse(&odm, &manifest_for(&server)).unwrap();

        assert_eq!(license.client_id, "SESSION-42");
        assert_eq!(fs::read_to_string(sidecar_path(&odm)).unwrap(), body);
        assert_eq!(seen.hits.load(Ordering::SeqCst), 1);

        let device_id = identity.client_id().unwrap();
        let query = seen.query.lock().unwrap().clone().unwrap();
        assert_eq!(query.get("MediaID").map(String::as_str), Some("1A2B-3C4D"));
        assert_eq!(query.get("ClientID"), Some(&device_id));
        assert_eq!(query.get("OMC").map(String::as_str), Some(OMC));
        assert_eq!(query.get("OS").map(String::as_str), Some(OS));
        assert_eq!(query.get("Hash"), Some(&auth_hash(&device_id, OMC, OS)));
        assert_eq!(seen.user_agent.lock().unwrap().as_deref(), Some(USER_AGENT));
    }

    #[test]
    fn forbidden_is_fatal_and_leaves_no_sidecar() {
        let (server, _) = license_server(StatusCode::FORBIDDEN, "denied".to_string());
        let dir = tempfile::tempdir().unwrap();
        let odm = dir.path().join("book.odm");

        let http = HttpClient::new(HttpOptions::default()).unwrap();
        let acquirer = LicenseAcquirer::new(&http, DeviceIdentity::at(dir.path().join("cid")));
        let err = acquirer.acquire_or_reuse(&odm, &manifest_for(&server)).unwrap_err();

        assert!(matches!(err, DownloadError::LicenseAcquisition(_)));
        assert!(err.to_string().contains("403"));
        assert!(!sidecar_path(&odm).exists());
    }

    #[test]
    fn license_without_client_id_is_fatal() {
        let (server, _) = license_server(StatusCode::OK, "<License/>".to_string());
        let dir = tempfile::tempdir().unwrap();
        let odm = dir.path().join("book.odm");

        let http = HttpClient::new(HttpOptions::default()).unwrap();
        let acquirer = LicenseAcquirer::new(&http, DeviceIdentity::at(dir.path().join("cid")));
        let err = acquirer.acquire_or_reuse(&odm, &manifest_for(&server)).unwrap_err();
        assert!(err.to_string().contains("ClientID"));
    }

    #[test]
    fn empty_sidecar_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let odm = dir.path().join("book.odm");
        fs::write(sidecar_path(&odm), "").unwrap();

        let http = HttpClient::new(HttpOptions::default()).unwrap();
        let acquirer = LicenseAcquirer::new(&http, DeviceIdentity::at(dir.path().join("cid")));
        let doc = sample_odm(r#"<Creator role="Author">Jane Doe</Creator>"#, 1, &[(1, 10)]);
        let manifest = Manifest::parse(doc.as_bytes(), false).unwrap();
        let err = acquirer.acquire_or_reuse(&odm, &manifest).unwrap_err();
        assert!(err.to_string().contains("missing license content"));
    }
}
