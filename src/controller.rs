use crate::config::Config;
use crate::directory::{ContainerDirectory, ContainerId};
use crate::error::ControllerError;
use crate::report::CompactionReport;
use crate::runner::{spawn_runner, RunnerHandle, RunnerId, RunnerMessage};
use crate::stats::CompactionStats;
use crate::worker::CompletionCallback;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerStatus {
    Idling,
    Running,
    Suspending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTargets {
    All,
    Containers(Vec<ContainerId>),
}

enum ControllerMessage {
    Run {
        targets: RunTargets,
        max_concurrent: usize,
        diagnosing: bool,
        callback: Option<CompletionCallback>,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Suspend {
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    State {
        reply: oneshot::Sender<CompactionStats>,
    },
    Lock {
        container_id: ContainerId,
    },
    Finish {
        runner_id: RunnerId,
        container_id: ContainerId,
        report: CompactionReport,
    },
}

#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerMessage>,
    call_timeout: Duration,
}

impl ControllerHandle {
    async fn call<T>(
        &self,
        make_message: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make_message(reply_tx))
            .await
            .map_err(|_| ControllerError::ControllerGone)?;
        tokio::time::timeout(self.call_timeout, reply_rx)
            .await
            .map_err(|_| ControllerError::Timeout(self.call_timeout))?
            .map_err(|_| ControllerError::ControllerGone)
    }

    pub async fn run_default(&self) -> Result<(), ControllerError> {
        self.run_all(1, None).await
    }

    pub async fn run_all(
        &self,
        max_concurrent: usize,
        callback: Option<CompletionCallback>,
    ) -> Result<(), ControllerError> {
        self.call(|reply| ControllerMessage::Run {
            targets: RunTargets::All,
            max_concurrent,
            diagnosing: false,
            callback,
            reply,
        })
        .await?
    }

    pub async fn run(
        &self,
        targets: Vec<ContainerId>,
        max_concurrent: usize,
        callback: Option<CompletionCallback>,
    ) -> Result<(), ControllerError> {
        self.call(|reply| ControllerMessage::Run {
            targets: RunTargets::Containers(targets),
            max_concurrent,
            diagnosing: false,
            callback,
            reply,
        })
        .await?
    }

    pub async fn diagnose(
        &self,
        targets: RunTargets,
        max_concurrent: usize,
        callback: Option<CompletionCallback>,
    ) -> Result<(), ControllerError> {
        self.call(|reply| ControllerMessage::Run {
            targets,
            max_concurrent,
            diagnosing: true,
            callback,
            reply,
        })
        .await?
    }

    pub async fn suspend(&self) -> Result<(), ControllerError> {
        self.call(|reply| ControllerMessage::Suspend { reply })
            .await?
    }

    pub async fn resume(&self) -> Result<(), ControllerError> {
        self.call(|reply| ControllerMessage::Resume { reply })
            .await?
    }

    pub async fn stop(&self) -> Result<(), ControllerError> {
        self.call(|reply| ControllerMessage::Stop { reply }).await?
    }

    pub async fn state(&self) -> Result<CompactionStats, ControllerError> {
        self.call(|reply| ControllerMessage::State { reply }).await
    }

    pub async fn notify_lock(&self, container_id: ContainerId) {
        if self
            .tx
            .send(ControllerMessage::Lock { container_id })
            .await
            .is_err()
        {
            warn!(%container_id, "controller gone; dropping lock notification");
        }
    }

    pub async fn notify_finish(
        &self,
        runner_id: RunnerId,
        container_id: ContainerId,
        report: CompactionReport,
    ) {
        if self
            .tx
            .send(ControllerMessage::Finish {
                runner_id,
                container_id,
                report,
            })
            .await
            .is_err()
        {
            warn!(%container_id, "controller gone; dropping finish notification");
        }
    }
}

struct ControllerState {
    status: ControllerStatus,
    total_targets: usize,
    // Doubles as the Idling default baseline and as the in-flight dispatch queue while Running.
    pending: Vec<ContainerId>,
    reserved: Vec<ContainerId>,
    ongoing: HashMap<RunnerId, ContainerId>,
    // A runner with no entry in `ongoing` is idle; only happens while Suspending.
    runners: HashMap<RunnerId, RunnerHandle>,
    locked: HashSet<ContainerId>,
    max_concurrent: usize,
    is_diagnosing: bool,
    start_time: Option<DateTime<Utc>>,
    reports: Vec<CompactionReport>,
    next_runner_id: u64,
}

impl ControllerState {
    fn new(total_targets: usize, initial_pending: Vec<ContainerId>) -> Self {
        Self {
            status: ControllerStatus::Idling,
            total_targets,
            pending: initial_pending,
            reserved: Vec::new(),
            ongoing: HashMap::new(),
            runners: HashMap::new(),
            locked: HashSet::new(),
            max_concurrent: 1,
            is_diagnosing: false,
            start_time: None,
            reports: Vec::new(),
            next_runner_id: 0,
        }
    }

    fn fresh_runner_id(&mut self) -> RunnerId {
        let id = RunnerId(self.next_runner_id);
        self.next_runner_id += 1;
        id
    }

    fn snapshot(&self) -> CompactionStats {
        let mut ongoing: Vec<ContainerId> = self.ongoing.values().copied().collect();
        ongoing.sort();
        let mut reports = self.reports.clone();
        reports.sort();
        let mut locked: Vec<ContainerId> = self.locked.iter().copied().collect();
        locked.sort();
        CompactionStats {
            status: self.status,
            total_targets: self.total_targets,
            reserved_count: self.reserved.len(),
            pending_count: self.pending.len(),
            ongoing_count: self.ongoing.len(),
            reserved: self.reserved.clone(),
            pending: self.pending.clone(),
            ongoing,
            locked,
            start_time: self.start_time,
            reports,
        }
    }
}

pub struct Controller;

impl Controller {
    pub fn spawn(directory: Arc<ContainerDirectory>, config: Config) -> ControllerHandle {
        Self::spawn_with_callback(directory, config, None)
    }

    pub fn spawn_with_callback(
        directory: Arc<ContainerDirectory>,
        config: Config,
        callback: Option<CompletionCallback>,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(config.controller_mailbox_capacity);
        let handle = ControllerHandle {
            tx,
            call_timeout: config.sync_call_timeout,
        };
        tokio::spawn(run_controller(rx, handle.clone(), directory, config, callback));
        handle
    }
}

struct Ctx {
    directory: Arc<ContainerDirectory>,
    self_handle: ControllerHandle,
    callback: Option<CompletionCallback>,
    runner_mailbox_capacity: usize,
}

async fn run_controller(
    mut mailbox: mpsc::Receiver<ControllerMessage>,
    self_handle: ControllerHandle,
    directory: Arc<ContainerDirectory>,
    config: Config,
    callback: Option<CompletionCallback>,
) {
    let mut state = ControllerState::new(directory.len(), directory.all_ids());
    let ctx = Ctx {
        directory,
        self_handle,
        callback,
        runner_mailbox_capacity: config.runner_mailbox_capacity,
    };

    while let Some(message) = mailbox.recv().await {
        match message {
            ControllerMessage::Run {
                targets,
                max_concurrent,
                diagnosing,
                callback,
                reply,
            } => {
                let result =
                    handle_run(&mut state, &ctx, targets, max_concurrent, diagnosing, callback);
                let _ = reply.send(result);
            }
            ControllerMessage::Suspend { reply } => {
                let result = handle_suspend(&mut state).await;
                let _ = reply.send(result);
            }
            ControllerMessage::Resume { reply } => {
                let result = handle_resume(&mut state).await;
                let _ = reply.send(result);
            }
            ControllerMessage::Stop { reply } => {
                for runner in state.runners.values() {
                    let _ = runner.send(RunnerMessage::Stop).await;
                }
                let total_targets = state.total_targets;
                state = ControllerState::new(total_targets, ctx.directory.all_ids());
                let _ = reply.send(Ok(()));
                break;
            }
            ControllerMessage::State { reply } => {
                let _ = reply.send(state.snapshot());
            }
            ControllerMessage::Lock { container_id } => {
                // never removed from pending; informational only
                state.locked.insert(container_id);
                debug!(%container_id, "container locked");
            }
            ControllerMessage::Finish {
                runner_id,
                container_id,
                report,
            } => {
                let fatal = handle_finish(&mut state, &ctx, runner_id, container_id, report).await;
                if fatal {
                    break;
                }
            }
        }
    }
}

fn pending_targets(directory: &ContainerDirectory, reserved: &[ContainerId]) -> Vec<ContainerId> {
    if reserved.is_empty() {
        directory.all_ids()
    } else {
        reserved.to_vec()
    }
}

#[instrument(skip(state, ctx, callback))]
fn handle_run(
    state: &mut ControllerState,
    ctx: &Ctx,
    targets: RunTargets,
    max_concurrent: usize,
    diagnosing: bool,
    callback: Option<CompletionCallback>,
) -> Result<(), ControllerError> {
    if state.status != ControllerStatus::Idling {
        return Err(ControllerError::BadState {
            current: state.status,
            attempted: "run",
        });
    }
    let targets = match targets {
        RunTargets::All => ctx.directory.all_ids(),
        RunTargets::Containers(ids) => ids,
    };
    let target_set: HashSet<ContainerId> = targets.iter().copied().collect();
    // reserved := baseline \ targets, where baseline is the current idle pending
    let baseline = if state.pending.is_empty() {
        ctx.directory.all_ids()
    } else {
        state.pending.clone()
    };
    state.reserved = baseline
        .into_iter()
        .filter(|id| !target_set.contains(id))
        .collect();
    state.pending = targets;
    state.is_diagnosing = diagnosing;
    state.max_concurrent = max_concurrent.max(1);
    state.reports.clear();
    state.start_time = Some(Utc::now());
    state.status = ControllerStatus::Running;
    let callback = callback.or_else(|| ctx.callback.clone());

    let slots = state.max_concurrent.min(state.pending.len());
    for _ in 0..slots {
        let Some(container_id) = state.pending.first().copied() else {
            break;
        };
        state.pending.remove(0);
        let runner_id = state.fresh_runner_id();
        let (runner, _join) = spawn_runner(
            runner_id,
            ctx.directory.clone(),
            ctx.self_handle.clone(),
            callback.clone(),
            ctx.runner_mailbox_capacity,
        );
        state.runners.insert(runner_id, runner.clone());
        state.ongoing.insert(runner_id, container_id);
        dispatch(&runner, container_id, state.is_diagnosing);
    }

    if state.ongoing.is_empty() {
        // targets was empty, or everything was locked out upstream
        complete_run(state, ctx);
    }
    Ok(())
}

fn dispatch(runner: &RunnerHandle, container_id: ContainerId, diagnosing: bool) {
    let runner = runner.clone();
    tokio::spawn(async move {
        if let Err(err) = runner
            .send(RunnerMessage::Run {
                container_id,
                diagnosing,
            })
            .await
        {
            error!(%container_id, ?err, "failed to dispatch run to runner");
        }
    });
}

fn complete_run(state: &mut ControllerState, ctx: &Ctx) {
    for runner in state.runners.values() {
        let runner = runner.clone();
        tokio::spawn(async move {
            let _ = runner.send(RunnerMessage::Stop).await;
        });
    }
    state.runners.clear();
    state.ongoing.clear();
    state.locked.clear();
    state.reports.sort();
    state.pending = pending_targets(&ctx.directory, &state.reserved);
    state.reserved.clear();
    state.status = ControllerStatus::Idling;
    info!(reports = state.reports.len(), "run complete");
}

async fn handle_suspend(state: &mut ControllerState) -> Result<(), ControllerError> {
    if state.status != ControllerStatus::Running {
        return Err(ControllerError::BadState {
            current: state.status,
            attempted: "suspend",
        });
    }
    state.status = ControllerStatus::Suspending;
    for runner in state.runners.values() {
        let _ = runner.send(RunnerMessage::Suspend).await;
    }
    Ok(())
}

async fn handle_resume(state: &mut ControllerState) -> Result<(), ControllerError> {
    if state.status != ControllerStatus::Suspending {
        return Err(ControllerError::BadState {
            current: state.status,
            attempted: "resume",
        });
    }
    state.status = ControllerStatus::Running;
    let runner_ids: Vec<RunnerId> = state.runners.keys().copied().collect();
    for runner_id in runner_ids {
        if state.ongoing.contains_key(&runner_id) {
            if let Some(runner) = state.runners.get(&runner_id) {
                let _ = runner.send(RunnerMessage::Resume).await;
            }
            continue;
        }
        // hasJob = false: either nothing left for it, or hand it the next target.
        if state.pending.is_empty() {
            if let Some(runner) = state.runners.remove(&runner_id) {
                let _ = runner.send(RunnerMessage::Stop).await;
            }
        } else {
            let container_id = state.pending.remove(0);
            if let Some(runner) = state.runners.get(&runner_id) {
                dispatch(runner, container_id, state.is_diagnosing);
                state.ongoing.insert(runner_id, container_id);
            }
        }
    }
    Ok(())
}

// returns true if the FSM task must stop (protocol violation)
async fn handle_finish(
    state: &mut ControllerState,
    ctx: &Ctx,
    runner_id: RunnerId,
    container_id: ContainerId,
    report: CompactionReport,
) -> bool {
    match state.status {
        ControllerStatus::Idling => {
            error!(
                %container_id,
                error = %ControllerError::ProtocolViolation,
                "finish received while idling; stopping controller"
            );
            return true;
        }
        ControllerStatus::Running => {
            state.ongoing.remove(&runner_id);
            state.reports.push(report);
            if !state.pending.is_empty() {
                let next = state.pending.remove(0);
                state.ongoing.insert(runner_id, next);
                if let Some(runner) = state.runners.get(&runner_id) {
                    dispatch(runner, next, state.is_diagnosing);
                }
            } else if state.ongoing.is_empty() {
                complete_run(state, ctx);
            } else if let Some(runner) = state.runners.remove(&runner_id) {
                let _ = runner.send(RunnerMessage::Stop).await;
            }
        }
        ControllerStatus::Suspending => {
            if !state.pending.is_empty() {
                state.ongoing.remove(&runner_id);
                state.reports.push(report);
                // runner stays registered but idle until Resume/Stop
            } else if state.ongoing.len() > 1 {
                state.ongoing.remove(&runner_id);
                state.reports.push(report);
                if let Some(runner) = state.runners.remove(&runner_id) {
                    let _ = runner.send(RunnerMessage::Stop).await;
                }
            } else {
                // last ongoing runner while suspended with nothing pending:
                // collapse to Idling without appending this final report
                state.ongoing.remove(&runner_id);
                complete_run(state, ctx);
            }
        }
    }
    false
}
