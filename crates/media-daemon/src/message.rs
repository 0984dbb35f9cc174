//! Event stream messages.
//!
//! Sent as JSON text, over both SSE and WebSocket:
//! - `{"Sync": [{"id", "title", "format", "shortname", "url"}, ...]}`
//! - `{"Exists": {"data": id, "metadata": {"title", "format", "shortname", "url"}}}`
//! - `{"Removed": {"data": id}}`

use media_store::{EventKind, ExternalMedia, Identifier, Listing, Media, StorageEvent, UrlMapper};
use serde::{Deserialize, Serialize};

/// Maximum accepted client frame (64KB). Clients only ever send `Sync`.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// One record of a snapshot, with its identifier inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: Identifier,
    #[serde(flatten)]
    pub media: ExternalMedia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Full current state.
    Sync(Vec<SnapshotEntry>),
    /// A record was created or changed.
    Exists {
        data: Identifier,
        metadata: ExternalMedia,
    },
    /// A record was deleted.
    Removed { data: Identifier },
}

impl ServerMessage {
    pub fn from_event(event: &StorageEvent<Media>, urls: &UrlMapper) -> Self {
        match event.kind {
            EventKind::Assign => ServerMessage::Exists {
                data: event.id.clone(),
                metadata: urls.external(&event.value),
            },
            EventKind::Delete => ServerMessage::Removed {
                data: event.id.clone(),
            },
        }
    }

    pub fn exists(id: &Identifier, media: &Media, urls: &UrlMapper) -> Self {
        ServerMessage::Exists {
            data: id.clone(),
            metadata: urls.external(media),
        }
    }

    pub fn snapshot(listing: &Listing<Media>, urls: &UrlMapper) -> Self {
        ServerMessage::Sync(
            listing
                .items
                .iter()
                .map(|(id, media)| SnapshotEntry {
                    id: id.clone(),
                    media: urls.external(media),
                })
                .collect(),
        )
    }

    pub fn to_json(&self) -> String {
        // Plain strings and maps only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Ask for one `Exists` message per current record.
    Sync,
}

impl ClientMessage {
    /// Parse a client frame. Accepts `"Sync"` and `{"Sync": null}`.
    ///
    /// Returns None if the data is not valid UTF-8 JSON or not a known message.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        serde_json::from_str(text.trim()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn urls() -> UrlMapper {
        UrlMapper::new("/data", "http://files")
    }

    fn movie() -> Media {
        Media {
            title: "a".into(),
            format: "mkv".into(),
            shortname: "a".into(),
            path: "/data/a.mkv".into(),
        }
    }

    #[test]
    fn test_exists_shape() {
        let id = Identifier::parse("id1").unwrap();
        let msg = ServerMessage::from_event(&StorageEvent::assign(id, movie()), &urls());
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Exists": {
                    "data": "id1",
                    "metadata": {
                        "title": "a",
                        "format": "mkv",
                        "shortname": "a",
                        "url": "http://files/a.mkv"
                    }
                }
            })
        );
    }

    #[test]
    fn test_removed_shape() {
        let id = Identifier::parse("id1").unwrap();
        let msg = ServerMessage::from_event(&StorageEvent::delete(id, movie()), &urls());
        assert_eq!(msg.to_json(), r#"{"Removed":{"data":"id1"}}"#);
    }

    #[test]
    fn test_snapshot_shape() {
        let mut items = BTreeMap::new();
        items.insert(Identifier::parse("id1").unwrap(), movie());
        let listing = Listing {
            items,
            unreadable: Vec::new(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::snapshot(&listing, &urls()).to_json()).unwrap();
        assert_eq!(json["Sync"][0]["id"], "id1");
        assert_eq!(json["Sync"][0]["url"], "http://files/a.mkv");
        assert!(json["Sync"][0].get("path").is_none());
    }

    #[test]
    fn test_parse_client_sync() {
        assert_eq!(ClientMessage::parse(b"\"Sync\""), Some(ClientMessage::Sync));
        assert_eq!(ClientMessage::parse(br#"{"Sync":null}"#), Some(ClientMessage::Sync));
        assert_eq!(ClientMessage::parse(b"\"Other\""), None);
        assert_eq!(ClientMessage::parse(&[0xff, 0xfe]), None);
    }
}
