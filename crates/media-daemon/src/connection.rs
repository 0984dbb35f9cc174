//! One WebSocket event client.
//!
//! Each connection owns a subscription to the media collection and forwards
//! every event as a JSON text frame. The only thing a client can ask for is
//! `Sync`, answered with one `Exists` frame per current record. If the
//! records cannot be listed the connection is closed with an error frame.

use crate::message::{ClientMessage, MAX_MESSAGE_SIZE, ServerMessage};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use media_store::{Collection, CollectionError, Media, Subscription, UrlMapper};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Error as WsError, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, error, info, warn};

type Writer = SplitSink<WebSocketStream<TcpStream>, Message>;

#[derive(Debug, Error)]
enum SnapshotError {
    #[error("cannot list records: {0}")]
    Listing(#[from] CollectionError),

    #[error(transparent)]
    Send(#[from] WsError),
}

/// A single client connection.
pub struct EventConnection {
    /// Connection ID for logging (e.g., "conn-1")
    pub conn_id: String,
    ws: WebSocketStream<TcpStream>,
    subscription: Subscription<Media>,
    collection: Arc<Collection<Media>>,
    urls: UrlMapper,
    keepalive: Duration,
}

impl EventConnection {
    pub fn new(
        conn_id: String,
        ws: WebSocketStream<TcpStream>,
        collection: Arc<Collection<Media>>,
        urls: UrlMapper,
        keepalive: Duration,
    ) -> Self {
        let subscription = collection.subscribe();
        Self {
            conn_id,
            ws,
            subscription,
            collection,
            urls,
            keepalive,
        }
    }

    /// Serve the client until either side goes away.
    pub async fn run(self) {
        let Self {
            conn_id,
            ws,
            mut subscription,
            collection,
            urls,
            keepalive,
        } = self;
        let (mut write, mut read) = ws.split();
        let mut ticker = interval_at(Instant::now() + keepalive, keepalive);

        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else {
                        debug!("Subscription for {} closed", conn_id);
                        break;
                    };
                    let message = ServerMessage::from_event(&event, &urls);
                    if let Err(e) = send(&mut write, &message).await {
                        debug!("Send to {} failed: {}", conn_id, e);
                        break;
                    }
                }

                incoming = read.next() => {
                    let data = match incoming {
                        Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                        Some(Ok(Message::Binary(data))) => data.to_vec(),
                        Some(Ok(Message::Close(_))) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                            debug!("Connection {} closed", conn_id);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                            break;
                        }
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    match ClientMessage::parse(&data) {
                        Some(ClientMessage::Sync) => {
                            match send_snapshot(&mut write, &collection, &urls).await {
                                Ok(()) => {}
                                Err(SnapshotError::Listing(e)) => {
                                    error!("Cannot answer sync from {}: {}", conn_id, e);
                                    let frame = CloseFrame {
                                        code: CloseCode::Error,
                                        reason: "cannot list records".into(),
                                    };
                                    let _ = write.send(Message::Close(Some(frame))).await;
                                    break;
                                }
                                Err(SnapshotError::Send(e)) => {
                                    debug!("Snapshot to {} failed: {}", conn_id, e);
                                    break;
                                }
                            }
                        }
                        None => warn!("Ignoring unrecognized message from {}", conn_id),
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::<u8>::new().into())).await {
                        debug!("Keepalive to {} failed: {}", conn_id, e);
                        break;
                    }
                }
            }
        }

        subscription.unsubscribe();
        let _ = write.close().await;
        info!("Connection {} closed", conn_id);
    }
}

async fn send(write: &mut Writer, message: &ServerMessage) -> Result<(), WsError> {
    write.send(Message::Text(message.to_json().into())).await
}

/// One `Exists` frame per current record.
async fn send_snapshot(
    write: &mut Writer,
    collection: &Collection<Media>,
    urls: &UrlMapper,
) -> Result<(), SnapshotError> {
    let listing = collection.list().await?;
    for (id, media) in &listing.items {
        send(write, &ServerMessage::exists(id, media, urls)).await?;
    }
    debug!("Sent {} record(s)", listing.items.len());
    Ok(())
}
