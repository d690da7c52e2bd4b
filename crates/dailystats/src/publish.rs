// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Idempotent replacement of one partition's stats file.
//!
//! A publish stages the payload outside the partition, copies it onto the
//! final key, sweeps every other object under the partition prefix and then
//! drops the staging object. A partition that held data is never observed
//! empty.

use crate::error::PublishError;
use crate::metrics::{DailyStats, render_csv};
use crate::partition::PartitionLocation;
use diagnostics::*;
use futures::stream::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Prefix, relative to the store root, where payloads wait before the copy
pub const STAGING_PREFIX: &str = "_staging";

/// What a successful publish left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub key: String,
    pub bytes: usize,
    /// Objects other than the final key removed from the partition
    pub swept: usize,
}

/// Writes daily stats into an object store partition
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
}

impl Publisher {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Whether any object is present under `prefix`
    pub async fn exists(&self, prefix: &str) -> Result<bool, PublishError> {
        let prefix = ObjectPath::from(prefix);
        let mut listing = self.store.list(Some(&prefix));
        match listing.next().await {
            Some(meta) => {
                let _ = meta?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every object under `prefix` in one batched delete stream.
    /// Returns the number of objects deleted.
    pub async fn delete_all(&self, prefix: &str) -> Result<usize, PublishError> {
        self.delete_matching(prefix, |_| true).await
    }

    async fn delete_matching<F>(&self, prefix: &str, include: F) -> Result<usize, PublishError>
    where
        F: Fn(&ObjectPath) -> bool,
    {
        let prefix_path = ObjectPath::from(prefix);
        let locations: Vec<ObjectPath> = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .filter(|location| include(location))
            .collect();

        if locations.is_empty() {
            info!("No objects to delete under {prefix}");
            return Ok(0);
        }

        let deleted = self
            .store
            .delete_stream(futures::stream::iter(locations.into_iter().map(Ok)).boxed())
            .try_collect::<Vec<_>>()
            .await?
            .len();
        info!("Deleted {deleted} objects under {prefix}");
        Ok(deleted)
    }

    /// Replace the contents of `location` with `stats` rendered as CSV
    pub async fn publish(
        &self,
        stats: &[DailyStats],
        location: &PartitionLocation,
    ) -> Result<PublishReceipt, PublishError> {
        let payload = render_csv(stats)?;
        self.publish_bytes(payload, location).await
    }

    /// Replace the contents of `location` with an already rendered payload
    pub async fn publish_bytes(
        &self,
        payload: Vec<u8>,
        location: &PartitionLocation,
    ) -> Result<PublishReceipt, PublishError> {
        let bytes = payload.len();
        let key = location.key.as_str();
        let final_path = ObjectPath::from(key);
        let staging_path = ObjectPath::from(format!(
            "{STAGING_PREFIX}/{}-{}",
            uuid7::uuid7(),
            final_path.filename().unwrap_or("payload")
        ));
        let staging = staging_path.to_string();

        debug!("Staging {bytes} bytes at {staging}");
        let _ = self
            .store
            .put(&staging_path, PutPayload::from(payload))
            .await
            .inspect_err(|e| {
                let reason = e.to_string();
                error!("Failed to stage {staging}: {reason}");
            })?;

        let swept = self
            .promote(&staging_path, &final_path, location, bytes)
            .await;

        // The staging object goes whether or not the promotion succeeded
        if let Err(e) = self.store.delete(&staging_path).await {
            let reason = e.to_string();
            warn!("Failed to remove staging object {staging}: {reason}");
        }
        let swept = swept?;

        Ok(PublishReceipt {
            key: key.to_string(),
            bytes,
            swept,
        })
    }

    /// Copy the staged payload onto the final key, confirm it and sweep the
    /// rest of the partition
    async fn promote(
        &self,
        staging_path: &ObjectPath,
        final_path: &ObjectPath,
        location: &PartitionLocation,
        bytes: usize,
    ) -> Result<usize, PublishError> {
        let key = location.key.as_str();
        self.store
            .copy(staging_path, final_path)
            .await
            .inspect_err(|e| {
                let reason = e.to_string();
                error!("Failed to copy staged payload onto {key}: {reason}");
            })?;

        let meta = self.store.head(final_path).await?;
        if meta.size != bytes as u64 {
            return Err(PublishError::Unconfirmed {
                key: key.to_string(),
                reason: format!("expected {bytes} bytes, found {}", meta.size),
            });
        }
        info!("Put {bytes} bytes to {key}");

        self.delete_matching(&location.prefix, |path| path != final_path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::TargetPartition;
    use chrono::NaiveDate;
    use object_store::memory::InMemory;

    fn location() -> PartitionLocation {
        TargetPartition::for_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).location(
            "shopify",
            "shopify_daily_stats",
            "csv",
        )
    }

    async fn keys(store: &Arc<dyn ObjectStore>) -> Vec<String> {
        let mut keys: Vec<String> = store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    async fn read(store: &Arc<dyn ObjectStore>, key: &str) -> Vec<u8> {
        store
            .get(&ObjectPath::from(key))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_second_publish_replaces_first() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let publisher = Publisher::new(store.clone());
        let location = location();

        let first = publisher
            .publish_bytes(b"first".to_vec(), &location)
            .await
            .unwrap();
        assert_eq!(first.swept, 0);

        let second = publisher
            .publish_bytes(b"second payload".to_vec(), &location)
            .await
            .unwrap();
        assert_eq!(second.bytes, 14);

        assert_eq!(keys(&store).await, vec![location.key.clone()]);
        assert_eq!(read(&store, &location.key).await, b"second payload");
    }

    #[tokio::test]
    async fn test_stale_objects_are_swept() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let publisher = Publisher::new(store.clone());
        let location = location();

        for stale in ["old.csv", "part-0000.csv"] {
            let path = ObjectPath::from(format!("{}/{stale}", location.prefix));
            let _ = store
                .put(&path, PutPayload::from_static(b"stale"))
                .await
                .unwrap();
        }
        let neighbour = "shopify/daily_stats/partition_date=2024-01-02/x.csv";
        let _ = store
            .put(&ObjectPath::from(neighbour), PutPayload::from_static(b"keep"))
            .await
            .unwrap();

        let receipt = publisher.publish(&[], &location).await.unwrap();
        assert_eq!(receipt.swept, 2);
        assert_eq!(
            keys(&store).await,
            vec![location.key.clone(), neighbour.to_string()]
        );
    }

    #[tokio::test]
    async fn test_exists_and_delete_all() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let publisher = Publisher::new(store.clone());
        let location = location();

        assert!(!publisher.exists(&location.prefix).await.unwrap());
        assert_eq!(publisher.delete_all(&location.prefix).await.unwrap(), 0);

        let _ = publisher
            .publish_bytes(b"x".to_vec(), &location)
            .await
            .unwrap();
        assert!(publisher.exists(&location.prefix).await.unwrap());

        assert_eq!(publisher.delete_all(&location.prefix).await.unwrap(), 1);
        assert!(!publisher.exists(&location.prefix).await.unwrap());
        assert!(keys(&store).await.is_empty());
    }
}
