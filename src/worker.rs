use crate::directory::ContainerId;
use crate::report::CompactionReport;
use crate::runner::RunnerHandle;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("worker rejected the request: {0}")]
    Rejected(String),
    #[error("worker is unreachable")]
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOp {
    Put,
    Get,
    Delete,
    Head,
    HeadWithMd5,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRequest {
    pub addr_id: u32,
    pub key: String,
    pub payload: Vec<u8>,
}

impl ObjectRequest {
    pub fn fingerprint(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.key.len());
        buf.extend_from_slice(&self.addr_id.to_be_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectReply {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub container_id: Option<ContainerId>,
    pub object_count: u64,
    pub total_bytes: u64,
}

pub type CompletionCallback = std::sync::Arc<dyn Fn(ContainerId, &CompactionReport) + Send + Sync>;

#[async_trait]
pub trait ContainerWorker: Send + Sync {
    fn container_id(&self) -> ContainerId;

    async fn put(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError>;
    async fn get(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError>;
    async fn delete(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError>;
    async fn head(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError>;
    async fn head_with_md5(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError>;
    async fn store(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError>;

    fn compaction_worker(&self) -> std::sync::Arc<dyn CompactionWorker>;

    async fn stats(&self) -> WorkerStats;
}

#[async_trait]
pub trait CompactionWorker: Send + Sync {
    async fn run(
        &self,
        runner: RunnerHandle,
        diagnosing: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<(), WorkerError>;

    async fn suspend(&self) -> Result<(), WorkerError>;
    async fn resume(&self) -> Result<(), WorkerError>;
}

impl fmt::Debug for dyn ContainerWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerWorker({})", self.container_id())
    }
}
