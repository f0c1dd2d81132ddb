use crate::directory::ContainerDirectory;
use crate::error::ControllerError;
use crate::worker::{ObjectOp, ObjectReply, ObjectRequest, WorkerStats};
use tracing::{instrument, warn};

pub struct Router<'a> {
    directory: &'a ContainerDirectory,
}

impl<'a> Router<'a> {
    pub fn new(directory: &'a ContainerDirectory) -> Self {
        Self { directory }
    }

    #[instrument(skip(self, request), fields(op = ?op))]
    pub async fn route(
        &self,
        op: ObjectOp,
        request: ObjectRequest,
    ) -> Result<ObjectReply, ControllerError> {
        let worker = self.directory.pick(&request.fingerprint())?;
        let result = match op {
            ObjectOp::Put => worker.put(request).await,
            ObjectOp::Get => worker.get(request).await,
            ObjectOp::Delete => worker.delete(request).await,
            ObjectOp::Head => worker.head(request).await,
            ObjectOp::HeadWithMd5 => worker.head_with_md5(request).await,
            ObjectOp::Store => worker.store(request).await,
        };
        result.map_err(|err| {
            warn!(?err, "worker rejected routed request");
            ControllerError::ProcessNotFound
        })
    }

    pub async fn fetch_all(
        &self,
        op: ObjectOp,
        request: ObjectRequest,
        max_keys: usize,
    ) -> Result<Vec<ObjectReply>, ControllerError> {
        if self.directory.is_empty() {
            return Err(ControllerError::NotFound);
        }
        let mut replies = Vec::new();
        for worker in self.directory.iter_workers() {
            let result = match op {
                ObjectOp::Put => worker.put(request.clone()).await,
                ObjectOp::Get => worker.get(request.clone()).await,
                ObjectOp::Delete => worker.delete(request.clone()).await,
                ObjectOp::Head => worker.head(request.clone()).await,
                ObjectOp::HeadWithMd5 => worker.head_with_md5(request.clone()).await,
                ObjectOp::Store => worker.store(request.clone()).await,
            };
            if let Ok(reply) = result {
                replies.push(reply);
                if replies.len() >= max_keys {
                    break;
                }
            }
        }
        if replies.is_empty() {
            return Err(ControllerError::NotFound);
        }
        Ok(replies)
    }

    pub async fn stats(&self) -> Vec<WorkerStats> {
        let mut stats = Vec::with_capacity(self.directory.len());
        for worker in self.directory.iter_workers() {
            stats.push(worker.stats().await);
        }
        stats
    }
}
