use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::classifier::FilterSet;
use crate::controller::{
    Command, Controller, ControllerError, RecursionMode, ScanOptions, TargetOutcome,
};
use crate::dictionary::Dictionary;
use crate::requester::{join_url, RequestError, Requester, Response};

/// In-memory requester: fixed status per path, 404 for everything else.
#[derive(Debug, Default)]
pub(crate) struct MockRequester {
    statuses: HashMap<String, u16>,
    failing: HashSet<String>,
    dead_targets: HashSet<String>,
    latency: Duration,
    target: Mutex<Option<String>>,
    requests: Mutex<Vec<(String, String)>>,
    replayed: Mutex<Vec<(String, String)>>,
}

impl MockRequester {
    pub(crate) fn new(statuses: HashMap<&str, u16>) -> Self {
        Self {
            statuses: statuses
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..Default::default()
        }
    }

    /// Requests for these paths time out.
    pub(crate) fn failing<'a>(mut self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(paths.into_iter().map(|p| p.to_string()));
        self
    }

    /// Every request against these targets times out.
    pub(crate) fn dead<'a>(mut self, targets: impl IntoIterator<Item = &'a str>) -> Self {
        self.dead_targets
            .extend(targets.into_iter().map(|t| t.to_string()));
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Paths requested without a proxy, in completion order.
    pub(crate) fn requested(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }

    pub(crate) fn requested_on(&self, target: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, path)| path.clone())
            .collect()
    }

    /// `(proxy, path)` pairs sent through a proxy override.
    pub(crate) fn replayed(&self) -> Vec<(String, String)> {
        self.replayed.lock().unwrap().clone()
    }
}

impl Requester for MockRequester {
    fn bind(&self, target: &str) -> Result<(), RequestError> {
        *self.target.lock().unwrap() = Some(target.to_string());
        Ok(())
    }

    fn request<'a>(
        &'a self,
        path: &'a str,
        proxy: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Response, RequestError>> {
        async move {
            let target = self
                .target
                .lock()
                .unwrap()
                .clone()
                .ok_or(RequestError::Unbound)?;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let full_path = join_url(&target, path);
            match proxy {
                Some(proxy) => self
                    .replayed
                    .lock()
                    .unwrap()
                    .push((proxy.to_string(), path.to_string())),
                None => self
                    .requests
                    .lock()
                    .unwrap()
                    .push((target.clone(), path.to_string())),
            }
            if self.dead_targets.contains(&target) || self.failing.contains(path) {
                return Err(RequestError::Timeout { url: full_path });
            }
            let status = self.statuses.get(path).copied().unwrap_or(404);
            let body = format!("<html>{status} {path}</html>");
            Ok(Response {
                status,
                length: body.len(),
                body,
                path: path.to_string(),
                full_path,
                ..Default::default()
            })
        }
        .boxed()
    }
}

fn words(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("w{i}")).collect()
}

fn not_found() -> FilterSet {
    FilterSet {
        exclude_status_codes: HashSet::from([404]),
        ..Default::default()
    }
}

fn controller(
    requester: Arc<MockRequester>,
    dict: Vec<String>,
    options: ScanOptions,
) -> Controller {
    let dictionary = Arc::new(Dictionary::from_words(dict).unwrap());
    Controller::new(requester, dictionary, not_found(), options)
}

fn targets(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}

fn hit_paths(hits: &[Arc<Response>]) -> HashSet<String> {
    hits.iter().map(|h| h.path.clone()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn finds_hits_on_a_single_target() {
    let requester = Arc::new(MockRequester::new(HashMap::from([
        ("admin", 200),
        ("backup.zip", 200),
    ])));
    let dict = vec!["admin", "login", "backup.zip", "index.php"]
        .into_iter()
        .map(String::from)
        .collect();
    let mut ctrl = controller(requester.clone(), dict, ScanOptions::default());

    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    assert_eq!(report.targets.len(), 1);
    let target = &report.targets[0];
    assert_eq!(target.outcome, TargetOutcome::Completed);
    assert_eq!(
        hit_paths(&target.hits),
        HashSet::from(["admin".to_string(), "backup.zip".to_string()])
    );
    assert_eq!(target.directories, vec![String::new()]);
    assert_eq!(requester.requested().len(), 4);
    assert_eq!(report.hit_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn circuit_breaker_abandons_target_and_moves_on() {
    let requester = Arc::new(
        MockRequester::new(HashMap::from([("w7", 200)]))
            .dead(["https://dead.example/"])
            .with_latency(Duration::from_millis(2)),
    );
    let options = ScanOptions {
        workers: 1,
        ..Default::default()
    };
    let mut ctrl = controller(requester.clone(), words(200), options);

    let report = ctrl
        .run(&targets(&["https://dead.example/", "https://live.example/"]))
        .await
        .unwrap();
    assert_eq!(report.targets.len(), 2);
    let dead = &report.targets[0];
    assert_eq!(dead.outcome, TargetOutcome::CircuitBreakerTripped);
    assert!(dead.errors >= 6);
    assert!(requester.requested_on("https://dead.example/").len() < 200);

    let live = &report.targets[1];
    assert_eq!(live.outcome, TargetOutcome::Completed);
    assert_eq!(live.errors, 0);
    assert_eq!(requester.requested_on("https://live.example/").len(), 200);
    assert_eq!(hit_paths(&live.hits), HashSet::from(["w7".to_string()]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_success_resets_the_consecutive_error_count() {
    let requester = Arc::new(
        MockRequester::new(HashMap::from([("w5", 200)]))
            .failing(["w0", "w1", "w2", "w3", "w4", "w6", "w7", "w8", "w9", "w10"]),
    );
    let options = ScanOptions {
        workers: 1,
        ..Default::default()
    };
    let mut ctrl = controller(requester, words(11), options);

    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    let target = &report.targets[0];
    assert_eq!(target.outcome, TargetOutcome::Completed);
    assert_eq!(target.errors, 10);
    assert_eq!(target.consecutive_errors, 5);
    assert_eq!(target.hits.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recursion_scans_each_directory_once() {
    let requester = Arc::new(MockRequester::new(HashMap::from([
        ("admin", 200),
        ("admin/", 200),
        ("backup", 200),
        ("admin/backup", 200),
        ("backup/admin", 200),
    ])));
    let dict = vec!["admin".to_string(), "admin/".to_string(), "backup".to_string()];
    let options = ScanOptions {
        workers: 4,
        recursion: RecursionMode::Plain,
        ..Default::default()
    };
    let mut ctrl = controller(requester.clone(), dict, options);

    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    let target = &report.targets[0];
    let scanned = &target.directories;
    let unique: HashSet<String> = scanned.iter().cloned().collect();
    let expected: HashSet<String> = ["", "admin/", "backup/", "admin/backup/", "backup/admin/"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(scanned.len(), unique.len());
    assert_eq!(unique, expected);
    assert_eq!(scanned[0], "");
    // every directory is fuzzed with the whole dictionary exactly once
    assert_eq!(requester.requested().len(), 5 * 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recursion_respects_depth_limit_and_status_filter() {
    let statuses = HashMap::from([
        ("admin", 301),
        ("backup", 200),
        ("admin/backup", 301),
    ]);
    let dict = vec!["admin".to_string(), "backup".to_string()];

    let requester = Arc::new(MockRequester::new(statuses.clone()));
    let options = ScanOptions {
        recursion: RecursionMode::Plain,
        max_recursion_depth: 1,
        ..Default::default()
    };
    let mut ctrl = controller(requester, dict.clone(), options);
    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    let scanned: HashSet<String> = report.targets[0].directories.iter().cloned().collect();
    assert_eq!(
        scanned,
        HashSet::from(["".to_string(), "admin/".to_string(), "backup/".to_string()])
    );

    let requester = Arc::new(MockRequester::new(statuses.clone()));
    let options = ScanOptions {
        recursion: RecursionMode::Plain,
        recursion_status_codes: HashSet::from([301]),
        ..Default::default()
    };
    let mut ctrl = controller(requester, dict.clone(), options);
    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    let scanned: HashSet<String> = report.targets[0].directories.iter().cloned().collect();
    assert_eq!(
        scanned,
        HashSet::from([
            "".to_string(),
            "admin/".to_string(),
            "admin/backup/".to_string()
        ])
    );

    // forced recursion ignores the status filter
    let requester = Arc::new(MockRequester::new(statuses));
    let options = ScanOptions {
        recursion: RecursionMode::Forced,
        recursion_status_codes: HashSet::from([301]),
        max_recursion_depth: 1,
        ..Default::default()
    };
    let mut ctrl = controller(requester, dict, options);
    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    assert!(report.targets[0]
        .directories
        .contains(&"backup/".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deep_recursion_queues_intermediate_parents() {
    let requester = Arc::new(MockRequester::new(HashMap::from([("a/b/c", 200)])));
    let options = ScanOptions {
        recursion: RecursionMode::Deep,
        max_recursion_depth: 1,
        exclude_subdirs: vec!["a/b/c/".to_string()],
        ..Default::default()
    };
    let mut ctrl = controller(requester, vec!["a/b/c".to_string()], options);

    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    let scanned = &report.targets[0].directories;
    assert_eq!(scanned, &vec!["".to_string(), "a/".to_string(), "a/b/".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seed_subdirectories_are_deduplicated() {
    let requester = Arc::new(MockRequester::new(HashMap::new()));
    let options = ScanOptions {
        subdirs: vec!["api".to_string(), "/api/".to_string(), "v2/".to_string()],
        ..Default::default()
    };
    let mut ctrl = controller(requester.clone(), vec!["users".to_string()], options);

    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    assert_eq!(
        report.targets[0].directories,
        vec!["api/".to_string(), "v2/".to_string()]
    );
    let requested: HashSet<String> = requester.requested().into_iter().collect();
    assert_eq!(
        requested,
        HashSet::from(["api/users".to_string(), "v2/users".to_string()])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn skip_on_status_abandons_only_that_target() {
    let requester = Arc::new(MockRequester::new(HashMap::from([("w0", 429), ("w3", 200)])));
    let options = ScanOptions {
        workers: 1,
        skip_on_status: HashSet::from([429]),
        ..Default::default()
    };
    let mut ctrl = controller(requester, words(50), options);

    let report = ctrl
        .run(&targets(&["https://a.example/", "https://b.example/"]))
        .await
        .unwrap();
    assert_eq!(report.targets.len(), 2);
    assert_eq!(report.targets[0].outcome, TargetOutcome::SkippedOnStatus(429));
    assert!(report.targets[0].hits.iter().all(|h| h.status != 429));
    assert_eq!(report.targets[1].outcome, TargetOutcome::SkippedOnStatus(429));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_time_ends_the_whole_run() {
    let requester =
        Arc::new(MockRequester::new(HashMap::new()).with_latency(Duration::from_millis(20)));
    let options = ScanOptions {
        workers: 2,
        max_time: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let mut ctrl = controller(requester.clone(), words(1000), options);

    let report = ctrl
        .run(&targets(&["https://a.example/", "https://b.example/"]))
        .await
        .unwrap();
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].outcome, TargetOutcome::TimedOut);
    assert!(requester.requested().len() < 1000);
    assert!(requester.requested_on("https://b.example/").is_empty());
    assert!(!ctrl.fuzzer().is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exit_on_error_aborts_the_run() {
    let requester = Arc::new(MockRequester::new(HashMap::new()).failing(["w2"]));
    let options = ScanOptions {
        workers: 1,
        exit_on_error: true,
        ..Default::default()
    };
    let mut ctrl = controller(requester, words(20), options);

    let err = ctrl
        .run(&targets(&["https://example.com/"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::RequestFailed { ref target, .. } if target == "https://example.com/"
    ));
    assert!(!ctrl.fuzzer().is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operator_can_skip_a_target_or_quit() {
    let requester =
        Arc::new(MockRequester::new(HashMap::new()).with_latency(Duration::from_millis(5)));
    let (tx, rx) = mpsc::channel(4);
    let options = ScanOptions {
        workers: 2,
        ..Default::default()
    };
    let mut ctrl = controller(requester.clone(), words(500), options).with_commands(rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(Command::SkipTarget).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(Command::Quit).await.unwrap();
    });

    let report = ctrl
        .run(&targets(&[
            "https://a.example/",
            "https://b.example/",
            "https://c.example/",
        ]))
        .await
        .unwrap();
    assert_eq!(report.targets.len(), 2);
    assert_eq!(report.targets[0].outcome, TargetOutcome::Skipped);
    assert_eq!(report.targets[1].outcome, TargetOutcome::Quit);
    assert!(requester.requested_on("https://c.example/").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_and_resume_commands_keep_every_word() {
    let requester =
        Arc::new(MockRequester::new(HashMap::new()).with_latency(Duration::from_millis(2)));
    let (tx, rx) = mpsc::channel(4);
    let options = ScanOptions {
        workers: 4,
        ..Default::default()
    };
    let mut ctrl = controller(requester.clone(), words(300), options).with_commands(rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(Command::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Command::Resume).await.unwrap();
    });

    let report = ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    assert_eq!(report.targets[0].outcome, TargetOutcome::Completed);
    let requested = requester.requested();
    let unique: HashSet<&String> = requested.iter().collect();
    assert_eq!(requested.len(), 300);
    assert_eq!(unique.len(), 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hits_are_replayed_through_the_proxy() {
    let requester = Arc::new(MockRequester::new(HashMap::from([("admin", 200), ("api", 403)])));
    let options = ScanOptions {
        replay_proxy: Some("http://127.0.0.1:8080".to_string()),
        ..Default::default()
    };
    let mut ctrl = controller(
        requester.clone(),
        vec!["admin".to_string(), "api".to_string(), "nope".to_string()],
        options,
    );

    ctrl.run(&targets(&["https://example.com/"])).await.unwrap();
    let replayed: HashSet<(String, String)> = requester.replayed().into_iter().collect();
    assert_eq!(
        replayed,
        HashSet::from([
            ("http://127.0.0.1:8080".to_string(), "admin".to_string()),
            ("http://127.0.0.1:8080".to_string(), "api".to_string()),
        ])
    );
    assert_eq!(requester.requested().len(), 3);
}
