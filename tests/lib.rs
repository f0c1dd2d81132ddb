use compaction_controller::config::Config;
use compaction_controller::controller::{Controller, ControllerStatus, RunTargets};
use compaction_controller::directory::{ContainerDirectory, ContainerId};
use compaction_controller::router::Router;
use compaction_controller::worker::{ObjectOp, ObjectRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

test_r::enable!();

// The library's `StubWorker`/`StubCompactionWorker` live under `#[cfg(test)]`
// inside `worker`, which is not visible across the crate boundary from an
// integration test binary; these scenarios build their own minimal workers
// with the same instant-finish behavior instead.
mod fixtures {
    use async_trait::async_trait;
    use compaction_controller::directory::ContainerId;
    use compaction_controller::report::CompactionReport;
    use compaction_controller::runner::{RunnerHandle, RunnerMessage};
    use compaction_controller::worker::{
        CompactionWorker, CompletionCallback, ContainerWorker, ObjectReply, ObjectRequest,
        WorkerError, WorkerStats,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    pub struct InstantCompactionWorker {
        container_id: ContainerId,
        pub suspended: Arc<AtomicBool>,
    }

    impl InstantCompactionWorker {
        pub fn new(container_id: ContainerId) -> Self {
            Self {
                container_id,
                suspended: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl CompactionWorker for InstantCompactionWorker {
        async fn run(
            &self,
            runner: RunnerHandle,
            diagnosing: bool,
            callback: Option<CompletionCallback>,
        ) -> Result<(), WorkerError> {
            let container_id = self.container_id;
            tokio::spawn(async move {
                let report = CompactionReport::new(container_id, diagnosing);
                if let Some(cb) = &callback {
                    cb(container_id, &report);
                }
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

    pub struct InMemoryWorker {
        container_id: ContainerId,
        compaction_worker: Arc<InstantCompactionWorker>,
        store: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryWorker {
        pub fn new(container_id: ContainerId) -> Self {
            Self {
                container_id,
                compaction_worker: Arc::new(InstantCompactionWorker::new(container_id)),
                store: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerWorker for InMemoryWorker {
        fn container_id(&self) -> ContainerId {
            self.container_id
        }

        async fn put(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
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
                .ok_or_else(|| WorkerError::Rejected("not found".into()))
        }

        async fn delete(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
            self.store.lock().await.remove(&req.key);
            Ok(ObjectReply::default())
        }

        async fn head(&self, req: ObjectRequest) -> Result<ObjectReply, WorkerError> {
            if self.store.lock().await.contains_key(&req.key) {
                Ok(ObjectReply::default())
            } else {
                Err(WorkerError::Rejected("not found".into()))
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
                total_bytes: 0,
            }
        }
    }
}

use fixtures::InMemoryWorker;

fn directory_of(n: u32) -> Arc<ContainerDirectory> {
    let mut dir = ContainerDirectory::new();
    for i in 0..n {
        dir.insert(ContainerId(i), Arc::new(InMemoryWorker::new(ContainerId(i))));
    }
    Arc::new(dir)
}

fn fast_config() -> Config {
    Config {
        sync_call_timeout: Duration::from_secs(3),
        runner_mailbox_capacity: 16,
        controller_mailbox_capacity: 64,
        ..Config::default()
    }
}

async fn wait_until_idle(controller: &compaction_controller::ControllerHandle, expected_reports: usize) {
    for _ in 0..100 {
        let stats = controller.state().await.unwrap();
        if stats.status == ControllerStatus::Idling && stats.reports.len() >= expected_reports {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("controller did not reach idle with {expected_reports} reports in time");
}

#[test]
async fn full_run_single_slot_processes_every_container_in_order() {
    let directory = directory_of(3);
    let controller = Controller::spawn(directory, fast_config());
    controller.run_all(1, None).await.unwrap();
    wait_until_idle(&controller, 3).await;

    let stats = controller.state().await.unwrap();
    let ids: Vec<_> = stats.reports.iter().map(|r| r.container_id).collect();
    assert_eq!(ids, vec![ContainerId(0), ContainerId(1), ContainerId(2)]);
}

#[test]
async fn concurrency_cap_is_never_exceeded_while_draining_many_targets() {
    let directory = directory_of(10);
    let controller = Controller::spawn(directory, fast_config());
    controller.run_all(3, None).await.unwrap();

    let mut max_seen = 0;
    for _ in 0..50 {
        let stats = controller.state().await.unwrap();
        max_seen = max_seen.max(stats.ongoing.len());
        if stats.status == ControllerStatus::Idling {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(max_seen <= 3);
}

#[test]
async fn suspend_resume_mid_flight_still_completes_every_target() {
    let directory = directory_of(6);
    let controller = Controller::spawn(directory, fast_config());
    controller.run_all(2, None).await.unwrap();
    controller.suspend().await.unwrap();
    controller.resume().await.unwrap();
    wait_until_idle(&controller, 6).await;

    let stats = controller.state().await.unwrap();
    assert_eq!(stats.reports.len(), 6);
}

#[test]
async fn diagnose_produces_reports_flagged_as_diagnosing() {
    let directory = directory_of(2);
    let controller = Controller::spawn(directory, fast_config());
    controller.diagnose(RunTargets::All, 2, None).await.unwrap();
    wait_until_idle(&controller, 2).await;

    let stats = controller.state().await.unwrap();
    assert!(stats.reports.iter().all(|r| r.diagnosing));
}

#[test]
async fn run_targets_a_subset_leaves_the_rest_untouched() {
    let directory = directory_of(5);
    let controller = Controller::spawn(directory, fast_config());
    controller
        .run(vec![ContainerId(1), ContainerId(3)], 4, None)
        .await
        .unwrap();
    wait_until_idle(&controller, 2).await;

    let stats = controller.state().await.unwrap();
    let mut ids: Vec<_> = stats.reports.iter().map(|r| r.container_id).collect();
    ids.sort();
    assert_eq!(ids, vec![ContainerId(1), ContainerId(3)]);

    let mut pending = stats.pending.clone();
    pending.sort();
    assert_eq!(pending, vec![ContainerId(0), ContainerId(2), ContainerId(4)]);
}

#[test]
async fn an_unqualified_run_after_a_partial_one_still_covers_everything() {
    let directory = directory_of(4);
    let controller = Controller::spawn(directory, fast_config());
    controller
        .run(vec![ContainerId(0), ContainerId(2)], 2, None)
        .await
        .unwrap();
    wait_until_idle(&controller, 2).await;
    let after_partial = controller.state().await.unwrap().pending;
    assert_eq!(
        { let mut p = after_partial; p.sort(); p },
        vec![ContainerId(1), ContainerId(3)]
    );

    // An unqualified run() always targets every container, not just the
    // carried-over complement; the complement only governs what `pending`
    // defaults to for the *next* unqualified run.
    controller.run_default().await.unwrap();
    wait_until_idle(&controller, 4).await;

    let stats = controller.state().await.unwrap();
    let mut ids: Vec<_> = stats.reports.iter().map(|r| r.container_id).collect();
    ids.sort();
    assert_eq!(ids, vec![ContainerId(0), ContainerId(1), ContainerId(2), ContainerId(3)]);
}

#[test]
async fn router_hashing_is_stable_across_repeated_lookups() {
    let directory = directory_of(8);
    let router = Router::new(&directory);
    let request = ObjectRequest {
        addr_id: 42,
        key: "stable-key".to_string(),
        payload: vec![],
    };
    router.route(ObjectOp::Head, request.clone()).await.ok();
    let first = directory.pick(&request.fingerprint()).unwrap().container_id();
    let second = directory.pick(&request.fingerprint()).unwrap().container_id();
    assert_eq!(first, second);
}

#[test]
async fn completion_callback_observes_every_finished_container() {
    let directory = directory_of(4);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    let controller = Controller::spawn_with_callback(
        directory,
        fast_config(),
        Some(Arc::new(move |_id, _report| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })),
    );
    controller.run_all(2, None).await.unwrap();
    wait_until_idle(&controller, 4).await;
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[test]
async fn a_per_run_callback_overrides_the_one_set_at_construction() {
    let directory = directory_of(2);
    let default_seen = Arc::new(AtomicUsize::new(0));
    let default_seen_clone = default_seen.clone();
    let controller = Controller::spawn_with_callback(
        directory,
        fast_config(),
        Some(Arc::new(move |_id, _report| {
            default_seen_clone.fetch_add(1, Ordering::SeqCst);
        })),
    );

    let override_seen = Arc::new(AtomicUsize::new(0));
    let override_seen_clone = override_seen.clone();
    controller
        .run_all(
            2,
            Some(Arc::new(move |_id, _report| {
                override_seen_clone.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();
    wait_until_idle(&controller, 2).await;

    assert_eq!(override_seen.load(Ordering::SeqCst), 2);
    assert_eq!(default_seen.load(Ordering::SeqCst), 0);
}
