use crate::controller::ControllerHandle;
use crate::directory::{ContainerDirectory, ContainerId};
use crate::error::ControllerError;
use crate::report::CompactionReport;
use crate::worker::{CompactionWorker, CompletionCallback};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunnerId(pub u64);

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runner-{}", self.0)
    }
}

pub enum RunnerMessage {
    Run {
        container_id: ContainerId,
        diagnosing: bool,
    },
    Lock {
        container_id: ContainerId,
    },
    Suspend,
    Resume,
    Finish {
        report: CompactionReport,
    },
    Stop,
}

#[derive(Clone)]
pub struct RunnerHandle {
    pub id: RunnerId,
    tx: mpsc::Sender<RunnerMessage>,
}

impl RunnerHandle {
    pub async fn send(&self, message: RunnerMessage) -> Result<(), ControllerError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ControllerError::ControllerGone)
    }
}

struct Assignment {
    container_id: ContainerId,
    compaction_worker: Arc<dyn CompactionWorker>,
}

pub fn spawn_runner(
    id: RunnerId,
    directory: Arc<ContainerDirectory>,
    controller: ControllerHandle,
    callback: Option<CompletionCallback>,
    mailbox_capacity: usize,
) -> (RunnerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let handle = RunnerHandle { id, tx };
    let join = tokio::spawn(run_job_runner(
        id,
        rx,
        handle.clone(),
        directory,
        controller,
        callback,
    ));
    (handle, join)
}

#[instrument(skip(mailbox, self_handle, directory, controller, callback), fields(runner = %id))]
async fn run_job_runner(
    id: RunnerId,
    mut mailbox: mpsc::Receiver<RunnerMessage>,
    self_handle: RunnerHandle,
    directory: Arc<ContainerDirectory>,
    controller: ControllerHandle,
    callback: Option<CompletionCallback>,
) {
    let mut assignment: Option<Assignment> = None;

    while let Some(message) = mailbox.recv().await {
        match message {
            RunnerMessage::Run {
                container_id,
                diagnosing,
            } => {
                if assignment.is_some() {
                    // The Controller only ever reassigns a runner right after
                    // consuming its Finish, so this is a reassignment, not a
                    // protocol error; the old assignment is simply replaced.
                    trace!(%container_id, "reassigning runner with an existing assignment");
                }
                let Some(container_worker) = directory.worker(container_id) else {
                    warn!(%container_id, "run dispatched for unknown container id");
                    continue;
                };
                let compaction_worker = container_worker.compaction_worker();
                if let Err(err) = compaction_worker
                    .run(self_handle.clone(), diagnosing, callback.clone())
                    .await
                {
                    warn!(%container_id, ?err, "compaction worker rejected run");
                    continue;
                }
                assignment = Some(Assignment {
                    container_id,
                    compaction_worker,
                });
            }
            RunnerMessage::Lock { container_id } => {
                controller.notify_lock(container_id).await;
            }
            RunnerMessage::Suspend => {
                if let Some(a) = &assignment {
                    if let Err(err) = a.compaction_worker.suspend().await {
                        warn!(container_id = %a.container_id, ?err, "suspend failed");
                    }
                } else {
                    debug!("suspend received on idle runner; ignored");
                }
            }
            RunnerMessage::Resume => {
                if let Some(a) = &assignment {
                    if let Err(err) = a.compaction_worker.resume().await {
                        warn!(container_id = %a.container_id, ?err, "resume failed");
                    }
                } else {
                    debug!("resume received on idle runner; ignored");
                }
            }
            RunnerMessage::Finish { report } => {
                let Some(a) = &assignment else {
                    warn!("finish received with no assignment; ignoring");
                    continue;
                };
                controller.notify_finish(id, a.container_id, report).await;
                // Assignment is kept until the Controller reassigns or stops us.
            }
            RunnerMessage::Stop => {
                trace!("runner stopping");
                break;
            }
        }
    }
}
