//! WebSocket server for event clients.
//!
//! Accepts connections and hands each one to its own task; the collection's
//! fan-out does the rest.

use crate::connection::EventConnection;
use anyhow::Result;
use media_store::{Collection, Media, UrlMapper};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info};

pub struct EventServer {
    collection: Arc<Collection<Media>>,
    urls: UrlMapper,
    keepalive: Duration,
    /// Counter for generating connection IDs
    next_conn_id: u64,
}

impl EventServer {
    pub fn new(collection: Arc<Collection<Media>>, urls: UrlMapper, keepalive: Duration) -> Self {
        Self {
            collection,
            urls,
            keepalive,
            next_conn_id: 1,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(mut self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.accept_connection(stream, addr),
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }

    /// Upgrade and serve one connection on its own task.
    pub fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        let collection = Arc::clone(&self.collection);
        let urls = self.urls.clone();
        let keepalive = self.keepalive;

        tokio::spawn(async move {
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    // Health checks (like `nc -z`) connect and close without
                    // completing the handshake.
                    debug!("WebSocket upgrade failed for {}: {}", addr, e);
                    return;
                }
            };

            info!("New connection from {} ({})", addr, conn_id);
            EventConnection::new(conn_id, ws, collection, urls, keepalive)
                .run()
                .await;
        });
    }
}
