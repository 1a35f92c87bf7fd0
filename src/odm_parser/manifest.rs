//! `.odm` 清单解析。
//!
//! ODM 文件的结构大致如下：
//!
//! ```xml
//! <OverDriveMedia id="ABCD-1234" ODMVersion="1.2">
//!   <License>
//!     <AcquisitionUrl>https://license.example.com/AcquireLicense</AcquisitionUrl>
//!   </License>
//!   <![CDATA[<Metadata>
//!     <Title>A Tale</Title>
//!     <Creators><Creator role="Author">Jane Doe</Creator></Creators>
//!     <CoverUrl>https://img.example.com/cover.jpg</CoverUrl>
//!   </Metadata>]]>
//!   <Formats><Format name="MP3 Audiobook">
//!     <Protocols><Protocol method="download" baseurl="https://dl.example.com/x"/></Protocols>
//!     <Parts count="1">
//!       <Part number="1" filename="A_Tale_Part01.mp3" name="Part 1" filesize="1024" duration="01:02:03"/>
//!     </Parts>
//!   </Format></Formats>
//! </OverDriveMedia>
//! ```
//!
//! `Metadata` 以文本形式嵌在外层文档里（通常在 CDATA 中），需要先用正则截取再单独解析。

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use tracing::{debug, info};

use crate::base_system::error::{DownloadError, DownloadResult};

const ODM_MAGIC: &str = "<OverDriveMedia";
const ODM_SNIFF_BYTES: usize = 100;

static RE_METADATA: OnceLock<Regex> = OnceLock::new();

fn re_metadata() -> &'static Regex {
    RE_METADATA
        .get_or_init(|| Regex::new(r"(?s)<Metadata>.*</Metadata>").expect("compile RE_METADATA"))
}

/// 一个可下载的音频分段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    pub name: String,
    pub filename: String,
    /// 从 1 开始，不保证与数组下标连续。
    pub number: u32,
    pub size_bytes: u64,
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// 多位作者以 `;` 连接。
    pub author: String,
    pub title: String,
    pub cover_url: Option<String>,
    pub base_url: String,
    pub parts: Vec<PartDescriptor>,
    pub acquisition_url: Option<String>,
    pub media_id: String,
}

impl Manifest {
    pub fn from_file(path: &Path, lowercase: bool) -> DownloadResult<Self> {
        let raw = fs::read(path).map_err(|e| DownloadError::fs(path, e))?;
        let manifest = Self::parse(&raw, lowercase)?;
        info!(
            "从 {} 解析到书名 \"{}\"，作者 {}",
            file_label(path),
            manifest.title,
            manifest.authors().join(", ")
        );
        Ok(manifest)
    }

    pub fn parse(document: &[u8], lowercase: bool) -> DownloadResult<Self> {
        let text = String::from_utf8_lossy(document);

        let block = re_metadata()
            .find(&text)
            .ok_or_else(|| DownloadError::manifest("could not find Metadata"))?;
        let meta = parse_metadata(block.as_str())?;
        let body = parse_body(&text)?;

        let base_url = body
            .base_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DownloadError::manifest("trouble extracting download URL"))?;

        if body.parts.len() != body.declared_parts {
            return Err(DownloadError::manifest(format!(
                "expecting {} parts, but found {} part records",
                body.declared_parts,
                body.parts.len()
            )));
        }

        let mut author = meta.author_line();
        let mut title = meta
            .title
            .ok_or_else(|| DownloadError::manifest("Metadata has no Title"))?;
        if lowercase {
            author = author.to_lowercase();
            title = title.to_lowercase();
        }

        debug!(
            parts = body.parts.len(),
            base_url = %base_url,
            "parsed ODM manifest"
        );

        Ok(Self {
            author,
            title,
            cover_url: meta.cover_url.filter(|u| !u.trim().is_empty()),
            base_url,
            parts: body.parts,
            acquisition_url: body.acquisition_url.filter(|u| !u.trim().is_empty()),
            media_id: body.media_id.unwrap_or_default(),
        })
    }

    pub fn authors(&self) -> Vec<&str> {
        self.author.split(';').collect()
    }
}

/// 校验输入确实是 ODM 文件：存在、不是目录、前 100 字节包含 `<OverDriveMedia`。
pub fn verify_odm_file(path: &Path) -> DownloadResult<()> {
    debug!("校验 ODM 文件: {}", path.display());
    if path.is_dir() {
        return Err(DownloadError::manifest(format!(
            "expected ODM file, given directory: {}",
            file_label(path)
        )));
    }
    if !path.is_file() {
        return Err(DownloadError::manifest(format!(
            "specified file \"{}\" does not exist",
            file_label(path)
        )));
    }

    let mut head = Vec::with_capacity(ODM_SNIFF_BYTES);
    File::open(path)
        .and_then(|f| f.take(ODM_SNIFF_BYTES as u64).read_to_end(&mut head))
        .map_err(|e| DownloadError::fs(path, e))?;
    if !String::from_utf8_lossy(&head).contains(ODM_MAGIC) {
        return Err(DownloadError::manifest(format!(
            "specified file \"{}\" is not in the correct OverDriveMedia format",
            file_label(path)
        )));
    }
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

// ── Metadata ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MetadataFields {
    authors: Vec<String>,
    editors: Vec<String>,
    title: Option<String>,
    cover_url: Option<String>,
}

impl MetadataFields {
    /// 没有 Author 时退回 Editor。
    fn author_line(&self) -> String {
        if self.authors.is_empty() {
            self.editors.join(";")
        } else {
            self.authors.join(";")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaField {
    Author,
    Editor,
    Title,
    CoverUrl,
}

fn parse_metadata(block: &str) -> DownloadResult<MetadataFields> {
    let mut reader = Reader::from_str(block);
    let mut fields = MetadataFields::default();
    let mut depth = 0usize;
    // (字段, 所在深度, 已收集文本)
    let mut capture: Option<(MetaField, usize, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                if capture.is_none() {
                    if let Some(field) = metadata_field(e, depth)? {
                        capture = Some((field, depth, String::new()));
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| DownloadError::manifest(format!("bad Metadata: {err}")))?;
                    buf.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(_)) => {
                if capture.as_ref().is_some_and(|(_, d, _)| *d == depth) {
                    if let Some((field, _, text)) = capture.take() {
                        fields.store(field, text);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(DownloadError::manifest(format!("bad Metadata: {err}")));
            }
            _ => {}
        }
    }

    Ok(fields)
}

impl MetadataFields {
    fn store(&mut self, field: MetaField, text: String) {
        match field {
            MetaField::Author => self.authors.push(text),
            MetaField::Editor => self.editors.push(text),
            MetaField::Title => {
                self.title.get_or_insert(text);
            }
            MetaField::CoverUrl => {
                self.cover_url.get_or_insert(text);
            }
        }
    }
}

fn metadata_field(e: &BytesStart<'_>, depth: usize) -> DownloadResult<Option<MetaField>> {
    let field = match e.name().as_ref() {
        b"Creator" => match attr(e, "role")?.as_deref() {
            Some("Author") => Some(MetaField::Author),
            Some("Editor") => Some(MetaField::Editor),
            _ => None,
        },
        // Title / CoverUrl 只认 Metadata 的直接子元素
        b"Title" if depth == 2 => Some(MetaField::Title),
        b"CoverUrl" if depth == 2 => Some(MetaField::CoverUrl),
        _ => None,
    };
    Ok(field)
}

// ── 文档主体 ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BodyFields {
    media_id: Option<String>,
    acquisition_url: Option<String>,
    base_url: Option<String>,
    declared_parts: usize,
    parts: Vec<PartDescriptor>,
}

fn parse_body(text: &str) -> DownloadResult<BodyFields> {
    let mut reader = Reader::from_str(text);
    let mut body = BodyFields::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut seen_protocol = false;
    let mut seen_parts = false;
    let mut acquisition_buf: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| DownloadError::manifest(format!("malformed document: {err}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name().as_ref().to_vec();

                if stack.is_empty() {
                    body.media_id = attr(e, "id")?;
                }

                match name.as_slice() {
                    b"Protocol" if !seen_protocol => {
                        if attr(e, "method")?.as_deref() == Some("download") {
                            seen_protocol = true;
                            body.base_url = attr(e, "baseurl")?;
                        }
                    }
                    b"Parts" if !seen_parts => {
                        seen_parts = true;
                        body.declared_parts = match attr(e, "count")? {
                            Some(raw) => raw.trim().parse().map_err(|_| {
                                DownloadError::manifest(format!("invalid Parts count \"{raw}\""))
                            })?,
                            None => 0,
                        };
                    }
                    b"Part" => body.parts.push(part_descriptor(e)?),
                    b"AcquisitionUrl"
                        if stack.len() == 2 && stack[1] == b"License" && body.acquisition_url.is_none() =>
                    {
                        acquisition_buf = Some(String::new());
                    }
                    _ => {}
                }

                if is_empty {
                    if let Some(buf) = acquisition_buf.take() {
                        body.acquisition_url = Some(buf);
                    }
                } else {
                    stack.push(name);
                }
            }
            Event::Text(ref e) => {
                if let Some(buf) = acquisition_buf.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| DownloadError::manifest(format!("malformed document: {err}")))?;
                    buf.push_str(&text);
                }
            }
            Event::End(_) => {
                stack.pop();
                if let Some(buf) = acquisition_buf.take() {
                    body.acquisition_url = Some(buf.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(body)
}

fn part_descriptor(e: &BytesStart<'_>) -> DownloadResult<PartDescriptor> {
    let required = |key: &str| -> DownloadResult<String> {
        attr(e, key)?
            .ok_or_else(|| DownloadError::manifest(format!("Part record is missing \"{key}\"")))
    };

    let raw_number = required("number")?;
    let number: u32 = raw_number
        .trim()
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| DownloadError::manifest(format!("invalid Part number \"{raw_number}\"")))?;
    let raw_size = required("filesize")?;
    let size_bytes: u64 = raw_size
        .trim()
        .parse()
        .map_err(|_| DownloadError::manifest(format!("invalid Part filesize \"{raw_size}\"")))?;

    Ok(PartDescriptor {
        name: attr(e, "name")?.unwrap_or_else(|| format!("Part {number:02}")),
        filename: required("filename")?,
        number,
        size_bytes,
        duration: attr(e, "duration")?.unwrap_or_default(),
    })
}

fn attr(e: &BytesStart<'_>, key: &str) -> DownloadResult<Option<String>> {
    let found = e
        .try_get_attribute(key)
        .map_err(|err| DownloadError::manifest(format!("bad attribute \"{key}\": {err}")))?;
    match found {
        Some(a) => a
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|err| DownloadError::manifest(format!("bad attribute \"{key}\": {err}"))),
        None => Ok(None),
    }
}
