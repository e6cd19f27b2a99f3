//! Item sources: where the list of things to rank comes from.

pub mod error;
pub mod jikan;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::rating_store::ItemId;

pub use error::FetchError;
pub use jikan::{JikanConfig, JikanSource};

/// `watching_status` of a completed entry on a MyAnimeList list.
pub const COMPLETED_STATUS: i64 = 2;

/// One entry of a user's list, as delivered by a source.
///
/// The ranking core only reads `mal_id` and `watching_status`; the rest is
/// carried for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub mal_id: ItemId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub watching_status: i64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl SourceItem {
    pub fn new(mal_id: ItemId, title: impl Into<String>) -> Self {
        Self {
            mal_id,
            title: title.into(),
            watching_status: COMPLETED_STATUS,
            score: None,
            url: None,
            image_url: None,
        }
    }

    pub fn with_status(mut self, watching_status: i64) -> Self {
        self.watching_status = watching_status;
        self
    }
}

/// Something that can produce the item list for a source identifier.
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch_items(&self, source_id: &str) -> Result<Vec<SourceItem>, FetchError>;
}

/// Reads items from a local JSON file instead of the network.
///
/// Accepts either a bare array of items or an object with an `anime` array,
/// so a saved API page works as-is. The source identifier is ignored.
#[derive(Debug, Clone)]
pub struct FileItemSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ItemFile {
    Bare(Vec<SourceItem>),
    Page { anime: Vec<SourceItem> },
}

impl FileItemSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ItemSource for FileItemSource {
    async fn fetch_items(&self, _source_id: &str) -> Result<Vec<SourceItem>, FetchError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let items = match serde_json::from_str::<ItemFile>(&raw)
            .map_err(|e| FetchError::Parse(format!("{}: {e}", self.path.display())))?
        {
            ItemFile::Bare(items) => items,
            ItemFile::Page { anime } => anime,
        };
        if items.is_empty() {
            return Err(FetchError::MissingData(format!(
                "{} holds no items",
                self.path.display()
            )));
        }
        Ok(items)
    }
}
