use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{QueryParam, StoredSwap, SwapStorage, matches_query};

/// Process-local storage, used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemorySwapStorage {
    swaps: RwLock<BTreeMap<String, StoredSwap>>,
}

impl MemorySwapStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.swaps.read().expect("storage lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SwapStorage for MemorySwapStorage {
    async fn save(&self, swap: &StoredSwap) -> Result<()> {
        self.swaps
            .write()
            .expect("storage lock poisoned")
            .insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn save_all(&self, swaps: &[StoredSwap]) -> Result<()> {
        let mut map = self.swaps.write().expect("storage lock poisoned");
        for swap in swaps {
            map.insert(swap.id.clone(), swap.clone());
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.swaps.write().expect("storage lock poisoned").remove(id);
        Ok(())
    }

    async fn remove_all(&self, ids: &[String]) -> Result<()> {
        let mut map = self.swaps.write().expect("storage lock poisoned");
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }

    async fn query(&self, groups: &[Vec<QueryParam>]) -> Result<Vec<StoredSwap>> {
        Ok(self
            .swaps
            .read()
            .expect("storage lock poisoned")
            .values()
            .filter(|swap| matches_query(swap, groups))
            .cloned()
            .collect())
    }
}
