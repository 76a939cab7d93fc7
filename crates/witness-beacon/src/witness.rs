//! Persistent witness cache seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use extpreimage::Preimage;
use tokio::sync::Mutex;

use crate::error::WitnessCacheError;

/// Kinds of witness the cache can hold. Only SHA-256 preimages are managed
/// by the beacon, but the cache is shared with other witness producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WitnessType {
    Sha256Hash,
}

impl WitnessType {
    /// Lookup key under which `witness` is stored.
    pub fn key_for(&self, witness: &[u8]) -> Result<Vec<u8>, WitnessCacheError> {
        match self {
            Self::Sha256Hash => {
                let preimage = Preimage::try_from(witness)
                    .map_err(|error| WitnessCacheError::InvalidWitness(error.to_string()))?;
                Ok(preimage.payment_hash().to_vec())
            }
        }
    }
}

#[async_trait]
pub trait WitnessCache: Send + Sync {
    async fn lookup_witness(
        &self,
        kind: WitnessType,
        key: &[u8],
    ) -> Result<Vec<u8>, WitnessCacheError>;

    async fn add_witness(&self, kind: WitnessType, witness: &[u8]) -> Result<(), WitnessCacheError>;
}

pub fn memory() -> Arc<MemoryWitnessCache> {
    Arc::new(MemoryWitnessCache::default())
}

/// Append-only in-memory witness cache.
#[derive(Default)]
pub struct MemoryWitnessCache {
    inner: Mutex<HashMap<(WitnessType, Vec<u8>), Vec<u8>>>,
}

impl MemoryWitnessCache {
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn witnesses(&self, kind: WitnessType) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|((entry_kind, _), _)| *entry_kind == kind)
            .map(|(_, witness)| witness.clone())
            .collect()
    }
}

#[async_trait]
impl WitnessCache for MemoryWitnessCache {
    async fn lookup_witness(
        &self,
        kind: WitnessType,
        key: &[u8],
    ) -> Result<Vec<u8>, WitnessCacheError> {
        self.inner
            .lock()
            .await
            .get(&(kind, key.to_vec()))
            .cloned()
            .ok_or(WitnessCacheError::NotFound)
    }

    async fn add_witness(&self, kind: WitnessType, witness: &[u8]) -> Result<(), WitnessCacheError> {
        let key = kind.key_for(witness)?;
        self.inner
            .lock()
            .await
            .entry((kind, key))
            .or_insert_with(|| witness.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn witnesses_are_keyed_by_their_hash() -> anyhow::Result<()> {
        let cache = MemoryWitnessCache::default();
        let preimage = Preimage::from_bytes([3u8; 32]);

        cache
            .add_witness(WitnessType::Sha256Hash, preimage.as_ref())
            .await?;
        cache
            .add_witness(WitnessType::Sha256Hash, preimage.as_ref())
            .await?;

        let stored = cache
            .lookup_witness(WitnessType::Sha256Hash, preimage.payment_hash().as_ref())
            .await?;
        assert_eq!(stored, preimage.to_vec());
        assert_eq!(cache.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_malformed_witnesses_are_rejected() {
        let cache = MemoryWitnessCache::default();
        assert_eq!(
            cache.lookup_witness(WitnessType::Sha256Hash, &[0u8; 32]).await,
            Err(WitnessCacheError::NotFound)
        );
        assert!(matches!(
            cache.add_witness(WitnessType::Sha256Hash, &[1u8; 31]).await,
            Err(WitnessCacheError::InvalidWitness(_))
        ));
        assert!(cache.is_empty().await);
    }
}
