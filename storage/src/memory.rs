use std::collections::BTreeMap;
use std::collections::HashSet;

use bytes::Bytes;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::Error;
use crate::Object;
use crate::ObjectSummary;
use crate::Operation;
use crate::PutRequest;
use crate::Result;

struct MemoryObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// A bucket living in the process memory
///
/// Objects are lost when the process exits. Operations listed in `faults` fail
/// with [Error::InjectedFault], which lets tests simulate an unreachable store.
#[derive(Default)]
pub(crate) struct MemoryBucket {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    faults: RwLock<HashSet<Operation>>,
}

impl MemoryBucket {
    async fn check(&self, operation: Operation) -> Result<()> {
        if self.faults.read().await.contains(&operation) {
            return Err(Error::InjectedFault(operation));
        }
        Ok(())
    }

    #[cfg(any(test, feature = "testing"))]
    pub(crate) async fn set_fault(&self, operation: Operation, failing: bool) {
        let mut faults = self.faults.write().await;
        if failing {
            faults.insert(operation);
        } else {
            faults.remove(&operation);
        }
    }

    pub(crate) async fn put(&self, request: PutRequest<'_>) -> Result<()> {
        self.check(Operation::Put).await?;
        let object = MemoryObject {
            data: request.data,
            content_type: request.content_type.to_owned(),
            last_modified: Utc::now(),
        };
        self.objects
            .write()
            .await
            .insert(request.key.to_owned(), object);
        Ok(())
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Object> {
        self.check(Operation::Get).await?;
        let objects = self.objects.read().await;
        let object = objects.get(key).ok_or_else(|| Error::NotFound {
            key: key.to_owned(),
        })?;
        Ok(Object {
            data: object.data.clone(),
            content_type: Some(object.content_type.clone()),
        })
    }

    pub(crate) async fn exists(&self, key: &str) -> Result<bool> {
        self.check(Operation::Head).await?;
        Ok(self.objects.read().await.contains_key(key))
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<()> {
        self.check(Operation::Delete).await?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    pub(crate) async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        self.check(Operation::List).await?;
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        self.check(Operation::Ping).await
    }
}
