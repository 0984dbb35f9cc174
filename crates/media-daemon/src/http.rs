//! HTTP API: record listing, redirects, updates, sync and the SSE stream.

use crate::error::{ApiError, Result};
use crate::message::{ServerMessage, SnapshotEntry};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        Redirect,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt, stream};
use media_store::{
    Collection, ExternalMedia, FieldUpdates, Identifier, Media, Merge, StorageEvent, SyncOutcome,
    UrlMapper, sync_snapshot, sync_updates,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared application state
pub struct AppState {
    pub collection: Arc<Collection<Media>>,
    pub urls: UrlMapper,
    pub keepalive: Duration,
    /// Flips to `true` when the server is shutting down; open event streams
    /// end so graceful shutdown can finish.
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/media", get(list_media))
        .route("/media/{id}", get(get_media).patch(update_media))
        .route("/media/sync", post(sync))
        .route("/media/snapshot", post(snapshot))
        .route("/events", get(events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_media(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SnapshotEntry>>> {
    let listing = state.collection.list().await?;
    let entries = listing
        .items
        .iter()
        .map(|(id, media)| SnapshotEntry {
            id: id.clone(),
            media: state.urls.external(media),
        })
        .collect();
    Ok(Json(entries))
}

async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Redirect> {
    let id = Identifier::parse(&id)?;
    let media = state
        .collection
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No media {}", id)))?;
    Ok(Redirect::temporary(&state.urls.url_for(std::path::Path::new(&media.path))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuery {
    /// Field name
    pub f: String,
    /// New value
    pub v: String,
}

async fn update_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<UpdateQuery>,
) -> Result<Json<SnapshotEntry>> {
    let mut updates = FieldUpdates::new();
    updates.insert(query.f, query.v);
    Media::check_fields(&updates)?;
    let id = Identifier::parse(&id)?;

    let _guard = state.collection.lock().await;
    let current = state
        .collection
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No media {}", id)))?;

    let mut updated = current.clone();
    updated.merge(&updates)?;
    if updated != current {
        state.collection.assign(&id, &updated).await?;
        state
            .collection
            .emit(StorageEvent::assign(id.clone(), updated.clone()))
            .await;
        info!("Updated {}", id);
    }

    Ok(Json(SnapshotEntry {
        media: state.urls.external(&updated),
        id,
    }))
}

/// Body of a successful sync.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub unknown: Vec<Identifier>,
    pub missing: BTreeMap<Identifier, ExternalMedia>,
}

impl SyncResponse {
    fn new(outcome: SyncOutcome<Media>, urls: &UrlMapper) -> Self {
        Self {
            unknown: outcome.unknown,
            missing: outcome
                .missing
                .iter()
                .map(|(id, media)| (id.clone(), urls.external(media)))
                .collect(),
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Malformed body: {}", e)))
}

async fn sync(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncResponse>)> {
    let client: BTreeMap<String, FieldUpdates> = parse_body(&body)?;
    debug!("Sync request with {} record(s)", client.len());
    let outcome = sync_updates(&*state.collection, client).await?;
    Ok((StatusCode::CREATED, Json(SyncResponse::new(outcome, &state.urls))))
}

/// A client's full view of one record.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientRecord {
    title: String,
    format: String,
    shortname: String,
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncResponse>)> {
    let client: BTreeMap<String, ClientRecord> = parse_body(&body)?;
    let client = client
        .into_iter()
        .map(|(id, record)| {
            let media = Media {
                title: record.title,
                format: record.format,
                shortname: record.shortname,
                path: String::new(),
            };
            (id, media)
        })
        .collect();
    let outcome = sync_snapshot(&*state.collection, client).await?;
    Ok((StatusCode::CREATED, Json(SyncResponse::new(outcome, &state.urls))))
}

async fn events(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // Subscribe first so nothing between the snapshot and the live feed is lost.
    let subscription = state.collection.subscribe();
    let listing = state.collection.list().await?;
    let first = Event::default().data(ServerMessage::snapshot(&listing, &state.urls).to_json());
    debug!("Event stream opened (subscriber {})", subscription.id());

    let urls = state.urls.clone();
    let live = stream::unfold(subscription, move |mut subscription| {
        let urls = urls.clone();
        async move {
            let event = subscription.recv().await?;
            let message = ServerMessage::from_event(&event, &urls);
            Some((Ok(Event::default().data(message.to_json())), subscription))
        }
    });

    let stream = stream::once(async move { Ok(first) })
        .chain(live)
        .take_until(stopped(state.shutdown.clone()));
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.keepalive)
            .event(Event::default().event("ping").data("ping")),
    ))
}

/// Resolves once shutdown is signalled or its sender is gone.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_response_shape() {
        let urls = UrlMapper::new("/data", "http://files");
        let id2 = Identifier::parse("id2").unwrap();
        let mut missing = BTreeMap::new();
        missing.insert(
            id2,
            Media {
                title: "Y".into(),
                format: "mkv".into(),
                shortname: "y".into(),
                path: "/data/y.mkv".into(),
            },
        );
        let outcome = SyncOutcome {
            unknown: vec![Identifier::parse("id3").unwrap()],
            missing,
            merged: 1,
        };

        let json = serde_json::to_value(SyncResponse::new(outcome, &urls)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "unknown": ["id3"],
                "missing": {
                    "id2": {
                        "title": "Y",
                        "format": "mkv",
                        "shortname": "y",
                        "url": "http://files/y.mkv"
                    }
                }
            })
        );
    }
}
