//! Moves staged files to durable storage and patches the owning block.

use chrono::Utc;
use podium_core::block::props::{set_failed, set_resolved};
use podium_core::notify::{ChangeNotification, ChangeNotifier};
use podium_core::upload::{
    Commit, RetryPolicy, UploadOutcome, UploadState, UploadTask, fallback_destination,
};
use podium_core::{PodiumError, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::UploadReceiver;
use crate::db::SiteRepo;
use crate::storage::{Body, Storage, StorageSet};

/// Executes upload tasks.
#[derive(Clone)]
pub struct UploadWorker {
    repo: Arc<SiteRepo>,
    storage: StorageSet,
    notifier: Arc<dyn ChangeNotifier>,
    policy: RetryPolicy,
}

impl UploadWorker {
    pub fn new(
        repo: Arc<SiteRepo>,
        storage: StorageSet,
        notifier: Arc<dyn ChangeNotifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            storage,
            notifier,
            policy,
        }
    }

    /// Run a task to a terminal outcome: retries, timeouts and temp cleanup
    /// included.
    pub async fn run(&self, task: &UploadTask) -> UploadOutcome {
        let mut state = UploadState::Queued;
        let outcome = self.run_attempts(task, &mut state).await;

        if let UploadOutcome::Failed(reason) = &outcome {
            error!(
                "Upload task failed permanently: website={}, block={}, prop={}, reason={}",
                task.website_id, task.block_id, task.prop_name, reason
            );
            let flagged = self
                .repo
                .merge_block_props(task.website_id, task.block_id, |props| {
                    set_failed(props, &task.prop_name)
                });
            if let Err(e) = flagged {
                warn!("Could not flag failed upload on block {}: {}", task.block_id, e);
            }
        }

        transition(task, &mut state, outcome.state());
        self.storage.temp.delete(&task.temp_path).await;
        outcome
    }

    async fn run_attempts(&self, task: &UploadTask, state: &mut UploadState) -> UploadOutcome {
        transition(task, state, UploadState::Uploading);
        if !self.storage.temp.exists(&task.temp_path).await {
            return UploadOutcome::Failed(format!("temporary file {} is missing", task.temp_path));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                transition(task, state, UploadState::Uploading);
            }

            let reason =
                match tokio::time::timeout(self.policy.timeout, self.attempt(task)).await {
                    Ok(Ok(commit)) => return UploadOutcome::Committed(commit),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("timed out after {:?}", self.policy.timeout),
                };

            match self.policy.on_failure(attempt, reason) {
                UploadOutcome::Retryable { attempt, reason } => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "Upload attempt {} for block {} ({}) failed: {}; retrying in {:?}",
                        attempt, task.block_id, task.prop_name, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                terminal => return terminal,
            }
        }
    }

    /// One attempt: store the file, then merge the single prop.
    async fn attempt(&self, task: &UploadTask) -> Result<Commit> {
        let exists = self
            .repo
            .block_exists(task.website_id, task.block_id)
            .map_err(|e| PodiumError::Storage(e.to_string()))?;
        if !exists {
            info!(
                "Block {} was deleted before its {} upload finished",
                task.block_id, task.prop_name
            );
            return Ok(Commit::BlockMissing);
        }

        let source = self
            .storage
            .temp
            .resolve(&task.temp_path)
            .ok_or_else(|| PodiumError::Storage(format!("invalid temp path {}", task.temp_path)))?;
        let reference = self.store(task, Body::File(source)).await?;

        let merged = self
            .repo
            .merge_block_props(task.website_id, task.block_id, |props| {
                set_resolved(props, &task.prop_name, Value::String(reference.clone()))
            })?;
        if !merged {
            // Deleted while uploading; remove the object we just wrote.
            self.storage.backend_for(&reference).delete(&reference).await;
            return Ok(Commit::BlockMissing);
        }

        let delivered = self.notifier.notify(
            task.website_id,
            ChangeNotification {
                block_id: task.block_id.to_string(),
                prop_name: task.prop_name.clone(),
                image_url: self.storage.url(&reference),
            },
        );
        debug!(
            "Upload of {} for block {} committed as {} ({} subscribers notified)",
            task.prop_name, task.block_id, reference, delivered
        );

        Ok(Commit::Applied { reference })
    }

    /// Put the file on the primary backend, falling back to the public disk.
    async fn store(&self, task: &UploadTask, body: Body) -> Result<String> {
        if let Some(primary) = &self.storage.primary {
            if primary.put(&task.destination_path, body.clone()).await {
                return Ok(task.destination_path.clone());
            }
            warn!(
                "{} upload of {} failed, using fallback storage",
                primary.name(),
                task.destination_path
            );
        }

        let fallback_path = fallback_destination(
            task.website_id,
            task.block_id,
            &task.prop_name,
            Utc::now().timestamp(),
            &task.extension(),
        );
        if self.storage.fallback.put(&fallback_path, body).await {
            return Ok(fallback_path);
        }

        Err(PodiumError::Storage(format!(
            "no storage backend accepted {}",
            task.temp_path
        )))
    }
}

fn transition(task: &UploadTask, state: &mut UploadState, next: UploadState) {
    if !state.can_become(next) {
        warn!(
            "Unexpected upload state change {} -> {} for block {}",
            state, next, task.block_id
        );
    }
    debug!(
        "Upload {} of block {}: {} -> {}",
        task.prop_name, task.block_id, state, next
    );
    *state = next;
}

/// Spawn `count` workers pulling from `receiver`.
pub fn spawn_workers(
    worker: UploadWorker,
    receiver: UploadReceiver,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|index| {
            let worker = worker.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                debug!("Upload worker {} started", index);
                while let Some(task) = receiver.next().await {
                    worker.run(&task).await;
                    receiver.done();
                }
                debug!("Upload worker {} stopped", index);
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::storage::LocalDisk;
    use async_trait::async_trait;
    use podium_core::block::props::{
        failed_flag_key, set_uploading, uploading_flag_key,
    };
    use podium_core::reconcile::PreparedBlock;
    use podium_core::{Block, BlockId, BlockType};
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// A backend that refuses every write.
    struct BrokenDisk;

    #[async_trait]
    impl Storage for BrokenDisk {
        fn name(&self) -> &str {
            "broken"
        }
        async fn exists(&self, _path: &str) -> bool {
            false
        }
        async fn put(&self, _path: &str, _body: Body) -> bool {
            false
        }
        async fn delete(&self, _path: &str) -> bool {
            false
        }
        fn url(&self, path: &str) -> String {
            format!("https://broken.test/{}", path)
        }
    }

    /// A backend whose writes hang well past any test timeout.
    #[derive(Default)]
    struct StalledDisk {
        puts: AtomicUsize,
    }

    #[async_trait]
    impl Storage for StalledDisk {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn exists(&self, _path: &str) -> bool {
            false
        }
        async fn put(&self, _path: &str, _body: Body) -> bool {
            self.puts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            true
        }
        async fn delete(&self, _path: &str) -> bool {
            false
        }
        fn url(&self, path: &str) -> String {
            format!("https://stalled.test/{}", path)
        }
    }

    /// Refuses the first write, then behaves like the wrapped disk.
    struct FlakyDisk {
        inner: LocalDisk,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl Storage for FlakyDisk {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn exists(&self, path: &str) -> bool {
            self.inner.exists(path).await
        }
        async fn put(&self, path: &str, body: Body) -> bool {
            if self.puts.fetch_add(1, Ordering::SeqCst) == 0 {
                return false;
            }
            self.inner.put(path, body).await
        }
        async fn delete(&self, path: &str) -> bool {
            self.inner.delete(path).await
        }
        fn url(&self, path: &str) -> String {
            self.inner.url(path)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(i64, ChangeNotification)>>,
    }

    impl ChangeNotifier for RecordingNotifier {
        fn notify(&self, website_id: i64, event: ChangeNotification) -> usize {
            self.events.lock().unwrap().push((website_id, event));
            1
        }
    }

    struct Fixture {
        _dir: TempDir,
        repo: Arc<SiteRepo>,
        storage: StorageSet,
        notifier: Arc<RecordingNotifier>,
        website_id: i64,
        block_id: i64,
    }

    fn fixture(primary: Option<Arc<dyn Storage>>, fallback: Option<Arc<dyn Storage>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(SiteRepo::new(conn));

        let team_id = repo.create_team("Team").unwrap();
        let event_id = repo.create_event(team_id, "Expo", None).unwrap();
        let event = repo.get_event(event_id).unwrap().unwrap();
        let website = repo
            .create_website(&event, &Default::default())
            .unwrap()
            .unwrap();

        let mut block = PreparedBlock::from_block(Block::new(
            BlockId::parse("Hero-1"),
            BlockType::Hero,
            serde_json::from_value(json!({"headingText": "Hi"})).unwrap(),
        ));
        set_uploading(&mut block.props, "imageUrl");
        block.uploads = vec!["imageUrl".to_string()];
        let saved = repo.save_website(website.id, vec![block], None, None).unwrap();

        let temp = Arc::new(LocalDisk::new(dir.path().join("temp"), "http://x.test/temp"));
        let fallback = fallback.unwrap_or_else(|| {
            Arc::new(LocalDisk::new(
                dir.path().join("public"),
                "http://localhost:3040/storage",
            ))
        });

        Fixture {
            repo,
            storage: StorageSet::new(temp, primary, fallback),
            notifier: Arc::new(RecordingNotifier::default()),
            website_id: website.id,
            block_id: saved.applied[0].id,
            _dir: dir,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }

    async fn staged_task(f: &Fixture) -> UploadTask {
        let temp_path = format!("block-{}-imageUrl-abcd1234.png", f.block_id);
        assert!(f.storage.temp.put(&temp_path, Body::Bytes(b"png".to_vec())).await);
        UploadTask {
            website_id: f.website_id,
            block_id: f.block_id,
            temp_path,
            destination_path: format!("blocks/{}/{}/abcd1234-1.png", f.website_id, f.block_id),
            prop_name: "imageUrl".to_string(),
        }
    }

    fn worker(f: &Fixture) -> UploadWorker {
        worker_with(f, policy())
    }

    fn worker_with(f: &Fixture, policy: RetryPolicy) -> UploadWorker {
        UploadWorker::new(f.repo.clone(), f.storage.clone(), f.notifier.clone(), policy)
    }

    #[tokio::test]
    async fn test_commit_to_primary() {
        let primary_dir = TempDir::new().unwrap();
        let primary: Arc<dyn Storage> =
            Arc::new(LocalDisk::new(primary_dir.path(), "https://cdn.test"));
        let f = fixture(Some(primary.clone()), None);
        let task = staged_task(&f).await;

        let outcome = worker(&f).run(&task).await;
        assert_eq!(
            outcome,
            UploadOutcome::Committed(Commit::Applied {
                reference: task.destination_path.clone()
            })
        );

        let props = &f.repo.list_blocks(f.website_id).unwrap()[0].props;
        assert_eq!(props["imageUrl"], json!(task.destination_path));
        assert!(!props.contains_key(&uploading_flag_key("imageUrl")));
        assert_eq!(props["headingText"], json!("Hi"));

        assert!(primary.exists(&task.destination_path).await);
        assert!(!f.storage.temp.exists(&task.temp_path).await);

        let events = f.notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, f.website_id);
        assert_eq!(events[0].1.block_id, f.block_id.to_string());
        assert_eq!(
            events[0].1.image_url,
            format!("https://cdn.test/{}", task.destination_path)
        );
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let f = fixture(Some(Arc::new(BrokenDisk)), None);
        let task = staged_task(&f).await;

        let outcome = worker(&f).run(&task).await;
        let UploadOutcome::Committed(Commit::Applied { reference }) = outcome else {
            panic!("expected commit, got {:?}", outcome);
        };
        assert!(reference.starts_with(&format!(
            "block-images/{}/{}/imageUrl-",
            f.website_id, f.block_id
        )));
        assert!(f.storage.fallback.exists(&reference).await);

        let events = f.notifier.events.lock().unwrap();
        assert!(events[0].1.image_url.starts_with("http://localhost:3040/storage/block-images/"));
    }

    #[tokio::test]
    async fn test_block_deleted_before_commit_is_noop() {
        let f = fixture(None, None);
        let task = staged_task(&f).await;
        f.repo.save_website(f.website_id, Vec::new(), None, None).unwrap();

        let outcome = worker(&f).run(&task).await;
        assert_eq!(outcome, UploadOutcome::Committed(Commit::BlockMissing));
        assert!(f.repo.list_blocks(f.website_id).unwrap().is_empty());
        assert!(f.notifier.events.lock().unwrap().is_empty());
        assert!(!f.storage.temp.exists(&task.temp_path).await);
    }

    #[tokio::test]
    async fn test_both_backends_failing_flags_the_prop() {
        let f = fixture(Some(Arc::new(BrokenDisk)), Some(Arc::new(BrokenDisk)));
        let task = staged_task(&f).await;

        let outcome = worker(&f).run(&task).await;
        assert!(matches!(outcome, UploadOutcome::Failed(_)));

        let props = &f.repo.list_blocks(f.website_id).unwrap()[0].props;
        assert_eq!(props[&failed_flag_key("imageUrl")], json!(true));
        assert!(!props.contains_key(&uploading_flag_key("imageUrl")));
        assert!(f.notifier.events.lock().unwrap().is_empty());
        assert!(!f.storage.temp.exists(&task.temp_path).await);
    }

    #[tokio::test]
    async fn test_missing_temp_file_fails_without_retry() {
        let f = fixture(None, None);
        let mut task = staged_task(&f).await;
        task.temp_path = "block-0-imageUrl-gone.png".to_string();

        let outcome = worker(&f).run(&task).await;
        assert!(matches!(outcome, UploadOutcome::Failed(reason) if reason.contains("missing")));
    }

    #[tokio::test]
    async fn test_two_props_of_one_block_both_land() {
        let f = fixture(None, None);
        f.repo
            .merge_block_props(f.website_id, f.block_id, |p| set_uploading(p, "backgroundImage"))
            .unwrap();

        let first = staged_task(&f).await;
        let mut second = first.clone();
        second.prop_name = "backgroundImage".to_string();
        second.temp_path = format!("block-{}-backgroundImage-ffff0000.png", f.block_id);
        assert!(f.storage.temp.put(&second.temp_path, Body::Bytes(b"png".to_vec())).await);

        let worker = worker(&f);
        let (a, b) = tokio::join!(worker.run(&first), worker.run(&second));
        assert!(matches!(a, UploadOutcome::Committed(Commit::Applied { .. })));
        assert!(matches!(b, UploadOutcome::Committed(Commit::Applied { .. })));

        let props = &f.repo.list_blocks(f.website_id).unwrap()[0].props;
        assert!(props["imageUrl"].as_str().unwrap().contains("/imageUrl-"));
        assert!(props["backgroundImage"].as_str().unwrap().contains("/backgroundImage-"));
        assert!(!props.keys().any(|k| k.starts_with("_")));
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out_every_attempt() {
        let stalled = Arc::new(StalledDisk::default());
        let f = fixture(Some(stalled.clone() as Arc<dyn Storage>), None);
        let task = staged_task(&f).await;
        let policy = RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_millis(50),
            ..policy()
        };

        let outcome = worker_with(&f, policy).run(&task).await;
        assert!(matches!(&outcome, UploadOutcome::Failed(reason) if reason.contains("timed out")));
        assert_eq!(stalled.puts.load(Ordering::SeqCst), 3);

        let props = &f.repo.list_blocks(f.website_id).unwrap()[0].props;
        assert_eq!(props[&failed_flag_key("imageUrl")], json!(true));
        assert!(!props.contains_key(&uploading_flag_key("imageUrl")));
        assert!(f.notifier.events.lock().unwrap().is_empty());
        assert!(!f.storage.temp.exists(&task.temp_path).await);
    }

    #[tokio::test]
    async fn test_transient_failure_commits_on_retry() {
        let public_dir = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyDisk {
            inner: LocalDisk::new(public_dir.path(), "http://localhost:3040/storage"),
            puts: AtomicUsize::new(0),
        });
        let f = fixture(None, Some(flaky.clone() as Arc<dyn Storage>));
        let task = staged_task(&f).await;

        let outcome = worker(&f).run(&task).await;
        let UploadOutcome::Committed(Commit::Applied { reference }) = outcome else {
            panic!("expected commit, got {:?}", outcome);
        };
        assert_eq!(flaky.puts.load(Ordering::SeqCst), 2);
        assert!(flaky.exists(&reference).await);

        let props = &f.repo.list_blocks(f.website_id).unwrap()[0].props;
        assert_eq!(props["imageUrl"], json!(reference));
        assert!(!props.contains_key(&failed_flag_key("imageUrl")));
        assert_eq!(f.notifier.events.lock().unwrap().len(), 1);
        assert!(!f.storage.temp.exists(&task.temp_path).await);
    }
}
