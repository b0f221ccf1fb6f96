use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::error::{BotError, BotResult};

/// Narrow seam over the key-value persistence backend. The schedule store
/// serializes its whole collection as one JSON document per write; there is
/// no partial-patch contract.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the bin has never been written.
    async fn read_document(&self) -> BotResult<Option<Value>>;
    async fn write_document(&self, doc: &Value) -> BotResult<()>;
}

/// JSONBin-style HTTP backend: one bin, master-key header auth.
pub struct JsonBinStore {
    client: reqwest::Client,
    base_url: String,
    bin_id: String,
    master_key: String,
}

impl JsonBinStore {
    pub fn new(base_url: &str, bin_id: &str, master_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bin_id: bin_id.to_string(),
            master_key: master_key.to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for JsonBinStore {
    async fn read_document(&self) -> BotResult<Option<Value>> {
        let url = format!("{}/b/{}/latest", self.base_url, self.bin_id);
        let res = self
            .client
            .get(&url)
            .header("X-Master-Key", &self.master_key)
            .send()
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;

        if res.status().as_u16() == 404 {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(BotError::Persistence(format!(
                "read failed with status {}",
                res.status()
            )));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;
        debug!("Fetched schedule document from bin {}", self.bin_id);

        // JSONBin wraps the stored document in a "record" envelope.
        match body.get("record") {
            Some(record) => Ok(Some(record.clone())),
            None => Ok(Some(body)),
        }
    }

    async fn write_document(&self, doc: &Value) -> BotResult<()> {
        let url = format!("{}/b/{}", self.base_url, self.bin_id);
        let res = self
            .client
            .put(&url)
            .header("X-Master-Key", &self.master_key)
            .json(doc)
            .send()
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;

        if !res.status().is_success() {
            return Err(BotError::Persistence(format!(
                "write failed with status {}",
                res.status()
            )));
        }
        debug!("Persisted schedule document to bin {}", self.bin_id);
        Ok(())
    }
}

/// In-memory backend used by tests and by `--dry-run` style local runs.
#[derive(Default)]
pub struct MemoryDocumentStore {
    doc: std::sync::Mutex<Option<Value>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: Value) -> Self {
        Self {
            doc: std::sync::Mutex::new(Some(doc)),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Option<Value> {
        self.doc.lock().expect("document lock").clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_document(&self) -> BotResult<Option<Value>> {
        Ok(self.doc.lock().expect("document lock").clone())
    }

    async fn write_document(&self, doc: &Value) -> BotResult<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BotError::Persistence("simulated write failure".into()));
        }
        *self.doc.lock().expect("document lock") = Some(doc.clone());
        Ok(())
    }
}
