//! Media records and the two conflict-resolution rules applied to them.
//!
//! - [`Resolve`]: whole-record precedence, challenger wins unless its field
//!   is empty.
//! - [`Merge`]: sparse field-name updates, all-or-nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Format tag used when a file has no extension.
pub const UNKNOWN_FORMAT: &str = "unknown";

/// Sparse update: field name to new value.
pub type FieldUpdates = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("Unacceptable field: {0}")]
    UnacceptableField(String),
}

/// Metadata kept for one media file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub title: String,
    /// Short format tag such as `mkv`, or [`UNKNOWN_FORMAT`].
    pub format: String,
    pub shortname: String,
    /// Absolute filesystem path, unique across live records.
    pub path: String,
}

impl Media {
    /// A record whose format is still empty has not been resolved.
    pub fn is_resolved(&self) -> bool {
        !self.format.is_empty()
    }

    /// Names of the fields that are currently empty.
    pub fn absent_fields(&self) -> Vec<&'static str> {
        [
            ("title", &self.title),
            ("format", &self.format),
            ("shortname", &self.shortname),
            ("path", &self.path),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Field-level precedence between two versions of a record.
pub trait Resolve {
    /// Combine `self` (authoritative) with `challenger`: every non-empty
    /// challenger field wins, empty ones fall back to `self`.
    fn resolve(&self, challenger: &Self) -> Self;

    /// Blank the fields only the server may set, so `resolve` keeps the
    /// authoritative value for them.
    fn clear_server_fields(&mut self) {}
}

impl Resolve for Media {
    fn resolve(&self, challenger: &Self) -> Self {
        fn pick(authoritative: &str, challenger: &str) -> String {
            if challenger.is_empty() {
                authoritative.to_string()
            } else {
                challenger.to_string()
            }
        }

        Media {
            title: pick(&self.title, &challenger.title),
            format: pick(&self.format, &challenger.format),
            shortname: pick(&self.shortname, &challenger.shortname),
            path: pick(&self.path, &challenger.path),
        }
    }

    fn clear_server_fields(&mut self) {
        self.path.clear();
    }
}

/// Named-field updates.
pub trait Merge {
    /// Field names accepted by [`Merge::merge`].
    const FIELDS: &'static [&'static str];

    /// Apply `updates`. Any unknown field rejects the whole update and
    /// leaves `self` untouched.
    fn merge(&mut self, updates: &FieldUpdates) -> Result<(), MergeError>;

    fn check_fields(updates: &FieldUpdates) -> Result<(), MergeError> {
        match updates
            .keys()
            .find(|name| !Self::FIELDS.contains(&name.as_str()))
        {
            Some(name) => Err(MergeError::UnacceptableField(name.clone())),
            None => Ok(()),
        }
    }
}

impl Merge for Media {
    // `path` is owned by reconciliation and cannot be set by clients.
    const FIELDS: &'static [&'static str] = &["title", "format", "shortname"];

    fn merge(&mut self, updates: &FieldUpdates) -> Result<(), MergeError> {
        Self::check_fields(updates)?;
        for (name, value) in updates {
            match name.as_str() {
                "title" => self.title = value.clone(),
                "format" => self.format = value.clone(),
                "shortname" => self.shortname = value.clone(),
                other => return Err(MergeError::UnacceptableField(other.to_string())),
            }
        }
        Ok(())
    }
}

/// Infer a record from a file path alone.
///
/// Title and shortname are the file name without its extension; format is
/// the lowercased extension, or [`UNKNOWN_FORMAT`]. Returns `None` for
/// paths without a UTF-8 file name.
pub fn guess_metadata_from_path(path: &Path) -> Option<Media> {
    let title = path.file_stem()?.to_str()?.to_string();
    let format = match path.extension() {
        Some(ext) => ext.to_str()?.to_lowercase(),
        None => UNKNOWN_FORMAT.to_string(),
    };
    Some(Media {
        shortname: title.clone(),
        title,
        format,
        path: path.to_str()?.to_string(),
    })
}

/// The representation of a record handed to clients. Never carries the
/// filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMedia {
    pub title: String,
    pub format: String,
    pub shortname: String,
    pub url: String,
}

/// Rewrites filesystem paths under `root` into URLs under `origin`.
#[derive(Debug, Clone)]
pub struct UrlMapper {
    root: PathBuf,
    origin: String,
}

impl UrlMapper {
    pub fn new(root: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        let origin: String = origin.into();
        Self {
            root: root.into(),
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL for a file. Paths outside the root map to their file name only.
    pub fn url_for(&self, path: &Path) -> String {
        let segments: Vec<String> = match path.strip_prefix(&self.root) {
            Ok(relative) => relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => {
                        Some(urlencoding::encode(&s.to_string_lossy()).into_owned())
                    }
                    _ => None,
                })
                .collect(),
            Err(_) => path
                .file_name()
                .map(|name| vec![urlencoding::encode(&name.to_string_lossy()).into_owned()])
                .unwrap_or_default(),
        };
        format!("{}/{}", self.origin, segments.join("/"))
    }

    pub fn external(&self, media: &Media) -> ExternalMedia {
        ExternalMedia {
            title: media.title.clone(),
            format: media.format.clone(),
            shortname: media.shortname.clone(),
            url: self.url_for(Path::new(&media.path)),
        }
    }
}
