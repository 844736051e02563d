use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use log::info;
use serde_json::Value;

use crate::{
    random_string, Fields, Introspect, Record, RecordAction, RecordEvent, RecordId, RecordStore,
    Result, StoreError, SubscriberRegistry, Subscription, SyncConfig,
};

/// An in-process record store.
///
/// Every client of a session shares the same instance, which makes it a stand-in for a
/// hosted backend in tests and in the demo.
pub struct MemoryStore {
    collection: &'static str,
    id_length: usize,
    records: DashMap<RecordId, Record>,
    subscribers: Arc<SubscriberRegistry>,
    available: AtomicCell<bool>,
    stats: StoreStats,
}

#[derive(Default)]
struct StoreStats {
    creates: AtomicCell<u64>,
    updates: AtomicCell<u64>,
    deletes: AtomicCell<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStoreIntrospection {
    pub collection: &'static str,
    pub records: usize,
    pub subscribers: usize,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl MemoryStore {
    /// A store handing out ids of [SyncConfig::record_id_length] characters
    pub fn new(collection: &'static str) -> Self {
        Self::with_id_length(collection, SyncConfig::default().record_id_length)
    }

    pub fn with_id_length(collection: &'static str, id_length: usize) -> Self {
        Self {
            collection,
            id_length,
            records: Default::default(),
            subscribers: SubscriberRegistry::new(),
            available: true.into(),
            stats: Default::default(),
        }
    }

    /// Simulates an outage. While unavailable, every operation fails with [StoreError::Unavailable].
    pub fn set_available(&self, available: bool) {
        info!(
            "Store {} is now {}",
            self.collection,
            if available { "available" } else { "unavailable" }
        );

        self.available.store(available);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} cannot be reached",
                self.collection
            )))
        }
    }

    fn not_found(&self, identifier: &str) -> StoreError {
        StoreError::NotFound {
            resource: self.collection,
            identifier: identifier.to_string(),
        }
    }

    fn next_id(&self) -> RecordId {
        loop {
            let id = random_string(self.id_length);

            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, fields: Fields) -> Result<Record> {
        self.ensure_available()?;

        let now = Utc::now();
        let record = Record {
            id: self.next_id(),
            created: now,
            updated: now,
            fields,
        };

        self.records.insert(record.id.clone(), record.clone());
        self.stats.creates.fetch_add(1);

        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Record> {
        self.ensure_available()?;

        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| self.not_found(id))
    }

    async fn update(&self, id: &str, fields: Fields) -> Result<Record> {
        self.ensure_available()?;

        let mut entry = self.records.get_mut(id).ok_or_else(|| self.not_found(id))?;

        entry.merge(fields);
        entry.updated = Utc::now();

        let record = entry.clone();
        self.stats.updates.fetch_add(1);

        // Publishing while the entry is still locked keeps delivery in commit order
        self.subscribers.publish(&RecordEvent {
            action: RecordAction::Updated,
            record: record.clone(),
        });

        drop(entry);
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_available()?;

        let (_, record) = self.records.remove(id).ok_or_else(|| self.not_found(id))?;
        self.stats.deletes.fetch_add(1);

        self.subscribers.publish(&RecordEvent {
            action: RecordAction::Deleted,
            record,
        });
        self.subscribers.close(id);

        Ok(())
    }

    async fn find_by_field(&self, field: &str, value: &Value) -> Result<Record> {
        self.ensure_available()?;

        self.records
            .iter()
            .find(|r| r.fields.get(field) == Some(value))
            .map(|r| r.clone())
            .ok_or_else(|| self.not_found(&format!("{}={}", field, value)))
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription> {
        self.ensure_available()?;

        if !self.records.contains_key(id) {
            return Err(self.not_found(id));
        }

        Ok(self.subscribers.register(id))
    }
}

impl Introspect<MemoryStoreIntrospection> for MemoryStore {
    fn introspect(&self) -> MemoryStoreIntrospection {
        MemoryStoreIntrospection {
            collection: self.collection,
            records: self.records.len(),
            subscribers: self.subscribers.count(),
            creates: self.stats.creates.load(),
            updates: self.stats.updates.load(),
            deletes: self.stats.deletes.load(),
        }
    }
}
