//! Process-wide, in-memory mapping from filename to an uploaded blob.
//!
//! A `Blob` is immutable once published: no overwrite, no deletion via
//! the protocol, destroyed only by process exit. Readers never block
//! writers and see either the pre-publish or post-publish state — never
//! a partial upload.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::codec::BLOCK_SIZE;

/// An ordered sequence of fixed-size data blocks. Every block except the
/// last is exactly [`BLOCK_SIZE`] bytes; the last is 0..=BLOCK_SIZE-1
/// bytes (0 is legal: it signals a trailing empty DATA after a blob
/// whose length is an exact multiple of `BLOCK_SIZE`).
#[derive(Debug, Clone, Default)]
pub struct Blob {
    blocks: Vec<Vec<u8>>,
}

impl Blob {
    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Accumulates blocks during an in-progress write transfer. Append-only;
/// converted into an immutable [`Blob`] once the upload completes.
#[derive(Debug, Default)]
pub struct BlobBuilder {
    blocks: Vec<Vec<u8>>,
}

impl BlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Vec<u8>) {
        self.blocks.push(block);
    }

    pub fn finish(self) -> Blob {
        Blob {
            blocks: self.blocks,
        }
    }
}

/// Outcome of a [`BlobStore::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    AlreadyExists,
}

/// Shared, concurrency-safe store. Cloning is cheap (`Arc` internally)
/// so every transfer handler can hold its own owned handle.
#[derive(Clone, Default)]
pub struct BlobStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, Arc<Blob>>>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) presence check. Readers never block on other readers.
    pub async fn contains(&self, filename: &[u8]) -> bool {
        self.inner.read().await.contains_key(filename)
    }

    /// Returns a cheap `Arc` clone — a stable snapshot for the duration
    /// of a read transfer, without copying the block data.
    pub async fn get(&self, filename: &[u8]) -> Option<Arc<Blob>> {
        self.inner.read().await.get(filename).cloned()
    }

    /// Atomic compare-and-insert. Holds the write lock across the check
    /// and the insert so two concurrent publishers of the same filename
    /// can never both observe "absent".
    pub async fn publish(&self, filename: Vec<u8>, blob: Blob) -> PublishOutcome {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&filename) {
            return PublishOutcome::AlreadyExists;
        }
        guard.insert(filename, Arc::new(blob));
        PublishOutcome::Published
    }
}
