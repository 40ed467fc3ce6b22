use crate::{Store, StoreError, StoreResult, STORE_DEADLINE};
use async_trait::async_trait;
use parking_lot::Mutex;
use snafu::ResultExt;

/// An etcd-backed [`Store`].
///
/// The client is held behind a lock rather than cloned freely: on a
/// deadline timeout the client is dropped and lazily reconnected on the
/// next call, rather than retried in place, since a hung connection is
/// more likely to be the cause than a slow single request.
pub struct EtcdStore {
    endpoints: Vec<String>,
    client: Mutex<Option<etcd_client::Client>>,
}

impl EtcdStore {
    pub async fn new(endpoints: Vec<String>) -> StoreResult<Self> {
        let client = etcd_client::Client::connect(&endpoints, None)
            .await
            .context(crate::Connect)?;
        Ok(Self {
            endpoints,
            client: Mutex::new(Some(client)),
        })
    }

    async fn client(&self) -> StoreResult<etcd_client::Client> {
        if let Some(client) = self.client.lock().clone() {
            return Ok(client);
        }
        let client = etcd_client::Client::connect(&self.endpoints, None)
            .await
            .context(crate::Connect)?;
        *self.client.lock() = Some(client.clone());
        Ok(client)
    }

    /// Drop the cached client so the next call reconnects from scratch.
    fn evict(&self) {
        *self.client.lock() = None;
    }

    async fn with_deadline<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(STORE_DEADLINE, fut).await {
            Ok(result) => result,
            Err(_) => {
                self.evict();
                Err(StoreError::Timeout)
            }
        }
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_deadline(async {
            let mut client = self.client().await?;
            let resp = client
                .get(key, None)
                .await
                .context(crate::Request)?;
            Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.with_deadline(async {
            let mut client = self.client().await?;
            client
                .put(key, value, None)
                .await
                .context(crate::Request)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_deadline(async {
            let mut client = self.client().await?;
            client
                .delete(key, None)
                .await
                .context(crate::Request)?;
            Ok(())
        })
        .await
    }
}
