//! Two-way sync between the collection and a client's cached snapshot.
//!
//! The client sends what it believes the records look like, keyed by
//! identifier. Records both sides know are merged and persisted; records
//! only the server knows come back as `missing`; identifiers only the client
//! knows come back as `unknown` and are never created.
//!
//! Input is validated in full before the first write, so a rejected request
//! changes nothing.

use crate::codec::Codec;
use crate::collection::{Collection, CollectionError, StorageEvent};
use crate::id::{Identifier, IdentifierError};
use crate::media::{FieldUpdates, Merge, MergeError, Resolve};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid identifier {raw:?}: {source}")]
    InvalidIdentifier {
        raw: String,
        #[source]
        source: IdentifierError,
    },

    #[error("Rejected update for {id}: {source}")]
    Merge {
        id: Identifier,
        #[source]
        source: MergeError,
    },

    #[error(transparent)]
    Collection(#[from] CollectionError),
}

impl SyncError {
    /// True when the request itself was at fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, SyncError::Collection(_))
    }
}

/// Result of a sync round.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome<T> {
    /// Client identifiers the server has no record for, ascending.
    pub unknown: Vec<Identifier>,
    /// Server records the client did not mention.
    pub missing: BTreeMap<Identifier, T>,
    /// Records whose stored value changed.
    pub merged: usize,
}

fn parse_keys<U>(client: BTreeMap<String, U>) -> Result<BTreeMap<Identifier, U>, SyncError> {
    client
        .into_iter()
        .map(|(raw, value)| match Identifier::parse(&raw) {
            Ok(id) => Ok((id, value)),
            Err(source) => Err(SyncError::InvalidIdentifier { raw, source }),
        })
        .collect()
}

async fn apply<T, C, U, F>(
    collection: &Collection<T, C>,
    mut client: BTreeMap<Identifier, U>,
    combine: F,
) -> Result<SyncOutcome<T>, SyncError>
where
    T: Clone + PartialEq + Send + 'static,
    C: Codec<T>,
    F: Fn(&Identifier, &T, U) -> Result<T, SyncError>,
{
    let _guard = collection.lock().await;
    // Unreadable records are logged by `list` and treated as absent.
    let listing = collection.list().await?;

    let mut outcome = SyncOutcome {
        unknown: Vec::new(),
        missing: BTreeMap::new(),
        merged: 0,
    };

    for (id, record) in listing.items {
        let Some(theirs) = client.remove(&id) else {
            outcome.missing.insert(id, record);
            continue;
        };
        let merged = combine(&id, &record, theirs)?;
        if merged == record {
            continue;
        }
        collection.assign(&id, &merged).await?;
        debug!("Merged client state into {}", id);
        collection.emit(StorageEvent::assign(id, merged)).await;
        outcome.merged += 1;
    }

    outcome.unknown = client.into_keys().collect();
    info!(
        "Sync: {} merged, {} missing on client, {} unknown",
        outcome.merged,
        outcome.missing.len(),
        outcome.unknown.len()
    );
    Ok(outcome)
}

/// Sync from sparse per-record field updates, applied with [`Merge`].
pub async fn sync_updates<T, C>(
    collection: &Collection<T, C>,
    client: BTreeMap<String, FieldUpdates>,
) -> Result<SyncOutcome<T>, SyncError>
where
    T: Merge + Clone + PartialEq + Send + 'static,
    C: Codec<T>,
{
    let client = parse_keys(client)?;
    for (id, updates) in &client {
        T::check_fields(updates).map_err(|source| SyncError::Merge {
            id: id.clone(),
            source,
        })?;
    }

    apply(collection, client, |id, record, updates| {
        let mut merged = record.clone();
        merged.merge(&updates).map_err(|source| SyncError::Merge {
            id: id.clone(),
            source,
        })?;
        Ok(merged)
    })
    .await
}

/// Sync from full client records, combined with [`Resolve`]: the server
/// record is authoritative and non-empty client fields win.
///
/// Server-owned fields of the client records are cleared first, so a client
/// can never move a record to another path.
pub async fn sync_snapshot<T, C>(
    collection: &Collection<T, C>,
    client: BTreeMap<String, T>,
) -> Result<SyncOutcome<T>, SyncError>
where
    T: Resolve + Clone + PartialEq + Send + 'static,
    C: Codec<T>,
{
    let client = parse_keys(client)?;
    apply(collection, client, |_, record, mut theirs| {
        theirs.clear_server_fields();
        Ok(record.resolve(&theirs))
    })
    .await
}
