use crate::directory::ContainerId;
use crate::report::CompactionReport;
use crate::runner::{RunnerHandle, RunnerMessage};
use crate::worker::{
    CompactionWorker, CompletionCallback, ContainerWorker, ObjectReply, ObjectRequest,
    WorkerError, WorkerStats,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub struct DemoCompactionWorker {
    container_id: ContainerId,
    suspended: Arc<std::sync::atomic::AtomicBool>,
}

impl DemoCompactionWorker {
    pub fn new(container_id: ContainerId) -> Self {
        Self {
            container_id,
            suspended: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl CompactionWorker for DemoCompactionWorker {
    async fn run(
        &self,
        runner: RunnerHandle,
        diagnosing: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<(), WorkerError> {
        let container_id = self.container_id;
        let suspended = self.suspended.clone();
        tokio::spawn(async move {
            // A small fixed delay stands in for real scan-and-rewrite work,
            // long enough to make `suspend`/`resume` observable in the demo.
            let mut waited = Duration::ZERO;
            while suspended.load(Ordering::SeqCst) && waited < Duration::from_secs(5) {
                tokio::time::sleep(Duration::from_millis(50)).await;
                waited += Duration::from_millis(50);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            let report = CompactionReport {
                container_id,
                diagnosing,
                active_entries: 100,
                reclaimed_entries: 17,
                reclaimed_bytes: 1 << 20,
                duration: Duration::from_millis(200),
            };
            if let Some(cb) = &callback {
                cb(container_id, &report);
            }
            debug!(%container_id, "demo compaction worker finished");
            let _ = runner.send(RunnerMessage::Finish { report }).await;
        });
        Ok(())
    }

    async fn suspend(&self) -> Result<(), WorkerError> {
        self.suspended.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), WorkerError> {
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct DemoWorker {
    container_id: ContainerId,
    compaction_worker: Arc<DemoCompactionWorker>,
    store: Mutex<HashMap<String, Vec<u8>>>,
    bytes_written: AtomicU64,
}

impl DemoWorker {
    pub fn new(container_id: ContainerId) -> Self {
        Self {
            container_id,
            compaction_worker: Arc::new(DemoCompactionWorker::new(container_id)),
            store: Mutex::new(HashMap::new()),
            bytes_written: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ContainerWorker for DemoWorker {
    fn container_id(&self) -> ContainerId {
        self.container_id
    }

    async fn put(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
        self.bytes_written
            .fetch_add(req.payload.len() as u64, Ordering::SeqCst);
        self.store.lock().await.insert(req.key, req.payload);
        Ok(ObjectReply::default())
    }

    async fn get(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
        self.store
            .lock()
            .await
            .get(&req.key)
            .cloned()
            .map(|payload| ObjectReply { payload })
            .ok_or_else(|| WorkerError::Rejected(format!("no such key: {}", req.key)))
    }

    async fn delete(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
        self.store.lock().await.remove(&req.key);
        Ok(ObjectReply::default())
    }

    async fn head(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
        if self.store.lock().await.contains_key(&req.key) {
            Ok(ObjectReply::default())
        } else {
            Err(WorkerError::Rejected(format!("no such key: {}", req.key)))
        }
    }

    async fn head_with_md5(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
        self.head(req).await
    }

    async fn store(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
        self.put(req).await
    }

    fn compaction_worker(&self) -> Arc<dyn CompactionWorker> {
        self.compaction_worker.clone()
    }

    async fn stats(&self) -> WorkerStats {
        WorkerStats {
            container_id: Some(self.container_id),
            object_count: self.store.lock().await.len() as u64,
            total_bytes: self.bytes_written.load(Ordering::SeqCst),
        }
    }
}
