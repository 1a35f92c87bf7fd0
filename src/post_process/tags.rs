//! 分段 ID3 标签写入。
//!
//! 配置里的键沿用 EasyID3 风格的名字（`genre`、`artist`…），在这里映射到 lofty 的 `ItemKey`。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::file::TaggedFile;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("failed to tag {path}: {source}")]
    Lofty {
        path: PathBuf,
        #[source]
        source: LoftyError,
    },
    #[error("unsupported tag key: {0}")]
    UnsupportedKey(String),
    #[error("{path} cannot hold a {tag_type} tag")]
    NoPrimaryTag { path: PathBuf, tag_type: String },
}

pub trait TagWriter {
    fn write_tags(&self, path: &Path, tags: &BTreeMap<String, String>) -> Result<(), TagError>;
}

/// EasyID3 风格键名 → lofty 通用键。
pub fn item_key(name: &str) -> Option<ItemKey> {
    let key = match name.to_ascii_lowercase().as_str() {
        "genre" => ItemKey::Genre,
        "artist" => ItemKey::TrackArtist,
        "album" => ItemKey::AlbumTitle,
        "albumartist" => ItemKey::AlbumArtist,
        "title" => ItemKey::TrackTitle,
        "composer" => ItemKey::Composer,
        "date" => ItemKey::RecordingDate,
        "tracknumber" => ItemKey::TrackNumber,
        "comment" => ItemKey::Comment,
        "publisher" => ItemKey::Publisher,
        _ => return None,
    };
    Some(key)
}

fn resolve_keys(tags: &BTreeMap<String, String>) -> Result<Vec<(ItemKey, &str)>, TagError> {
    tags.iter()
        .map(|(name, value)| {
            item_key(name)
                .map(|key| (key, value.as_str()))
                .ok_or_else(|| TagError::UnsupportedKey(name.clone()))
        })
        .collect()
}

/// 通过 lofty 写入文件的主标签（MP3 即 ID3v2），没有标签时新建。
#[derive(Debug, Default, Clone, Copy)]
pub struct Id3TagWriter;

impl TagWriter for Id3TagWriter {
    fn write_tags(&self, path: &Path, tags: &BTreeMap<String, String>) -> Result<(), TagError> {
        let items = resolve_keys(tags)?;
        let lofty_err = |source| TagError::Lofty {
            path: path.to_path_buf(),
            source,
        };

        let mut tagged = Probe::open(path)
            .and_then(|probe| probe.read())
            .map_err(lofty_err)?;
        let tag = primary_tag(&mut tagged, path)?;

        for (key, value) in items {
            tag.insert_text(key, value.to_string());
        }
        tag.save_to_path(path, WriteOptions::default())
            .map_err(lofty_err)?;
        debug!("已写入 {} 个标签: {}", tags.len(), path.display());
        Ok(())
    }
}

/// 取文件的主标签，没有时新建；文件格式不接受该标签类型时报错。
fn primary_tag<'f>(tagged: &'f mut TaggedFile, path: &Path) -> Result<&'f mut Tag, TagError> {
    let tag_type = tagged.primary_tag_type();
    if tagged.primary_tag().is_none() {
        tagged.insert_tag(Tag::new(tag_type));
    }
    tagged.primary_tag_mut().ok_or_else(|| TagError::NoPrimaryTag {
        path: path.to_path_buf(),
        tag_type: format!("{tag_type:?}"),
    })
}
