use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::common::{EntityKind, Record};
use crate::models::datasets::Entity;

/// Type-erased batch of one entity kind.
pub trait EntitySet: Send + Sync {
    fn len(&self) -> usize;

    fn records(&self) -> Result<Vec<Record>, serde_json::Error>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> EntitySet for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn records(&self) -> Result<Vec<Record>, serde_json::Error> {
        self.iter().map(Entity::to_record).collect()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// In-memory entities of one batch window, keyed by kind. Each window owns its own
/// accumulator; tasks of the window share it behind an `Arc`.
#[derive(Default)]
pub struct Accumulator {
    sets: RwLock<HashMap<EntityKind, Arc<dyn EntitySet>>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `items` as the batch for `T::KIND`, replacing any previous batch.
    pub async fn put<T: Entity>(&self, items: Vec<T>) -> usize {
        let count = items.len();
        self.sets.write().await.insert(T::KIND, Arc::new(items));
        count
    }

    /// The batch for `T::KIND`, empty when nothing was extracted.
    pub async fn get<T: Entity>(&self) -> Arc<Vec<T>> {
        let set = self.sets.read().await.get(&T::KIND).cloned();
        set.and_then(|set| set.into_any().downcast::<Vec<T>>().ok())
            .unwrap_or_default()
    }

    /// Serialized records for `kind`.
    pub async fn records(&self, kind: EntityKind) -> Result<Vec<Record>, serde_json::Error> {
        let set = self.sets.read().await.get(&kind).cloned();
        match set {
            Some(set) => set.records(),
            None => Ok(Vec::new()),
        }
    }

    pub async fn counts(&self) -> BTreeMap<EntityKind, usize> {
        self.sets
            .read()
            .await
            .iter()
            .map(|(kind, set)| (*kind, set.len()))
            .collect()
    }

    pub async fn clear(&self) {
        self.sets.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasets::accounts::{Account, Contract};

    fn account(address: &str, block: u64) -> Account {
        Account {
            address: address.to_string(),
            first_seen_block: block,
        }
    }

    #[tokio::test]
    async fn test_put_get_and_clear() {
        let acc = Accumulator::new();
        assert!(acc.get::<Account>().await.is_empty());

        acc.put(vec![account("0xaa", 1), account("0xbb", 2)]).await;
        let accounts = acc.get::<Account>().await;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].address, "0xbb");

        // Kinds are independent
        assert!(acc.get::<Contract>().await.is_empty());
        assert_eq!(acc.counts().await.get(&EntityKind::Account), Some(&2));

        let records = acc.records(EntityKind::Account).await.unwrap();
        assert_eq!(records[0].key, "0xaa");
        assert_eq!(records[0].block_number, Some(1));

        acc.clear().await;
        assert!(acc.counts().await.is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces_batch() {
        let acc = Accumulator::new();
        acc.put(vec![account("0xaa", 1)]).await;
        acc.put(vec![account("0xcc", 3), account("0xdd", 4)]).await;
        assert_eq!(acc.counts().await.get(&EntityKind::Account), Some(&2));
    }
}
