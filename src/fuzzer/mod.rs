use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::classifier::{self, FilterSet, Verdict};
use crate::dictionary::Dictionary;
use crate::requester::{RequestError, Requester, Response};

pub type ResponseCallback = Arc<dyn Fn(Arc<Response>) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(Arc<RequestError>) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Clone, Default)]
struct Listeners {
    matched: Vec<ResponseCallback>,
    missed: Vec<ResponseCallback>,
    errored: Vec<ErrorCallback>,
}

impl Listeners {
    fn dispatch_match(&self, response: &Arc<Response>) {
        for cb in self.matched.iter() {
            cb(response.clone());
        }
    }

    fn dispatch_miss(&self, response: &Arc<Response>) {
        for cb in self.missed.iter() {
            cb(response.clone());
        }
    }

    fn dispatch_error(&self, error: &Arc<RequestError>) {
        for cb in self.errored.iter() {
            cb(error.clone());
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("matched", &self.matched.len())
            .field("missed", &self.missed.len())
            .field("errored", &self.errored.len())
            .finish()
    }
}

// everything a worker needs for one run
struct WorkerContext {
    requester: Arc<dyn Requester>,
    dictionary: Arc<Dictionary>,
    filters: Arc<FilterSet>,
    listeners: Arc<Listeners>,
    base_path: String,
    delay: Duration,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

/// Worker pool draining a [`Dictionary`] against one base path per run.
///
/// Callbacks registered with `on_match`, `on_miss` and `on_error` run on the
/// worker tasks, concurrently and in no particular order. They should only
/// hand the outcome off (e.g. into a channel) and return.
pub struct Fuzzer {
    requester: Arc<dyn Requester>,
    dictionary: Arc<Dictionary>,
    filters: Arc<FilterSet>,
    listeners: Arc<Listeners>,
    base_path: String,
    delay: Duration,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    control: Arc<watch::Sender<EngineState>>,
    active: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for Fuzzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fuzzer")
            .field("base_path", &self.base_path)
            .field("delay", &self.delay)
            .field("rate_limited", &self.limiter.is_some())
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl Fuzzer {
    pub fn new(
        requester: Arc<dyn Requester>,
        dictionary: Arc<Dictionary>,
        filters: Arc<FilterSet>,
    ) -> Self {
        let (control, _) = watch::channel(EngineState::Idle);
        let (active, _) = watch::channel(false);
        Self {
            requester,
            dictionary,
            filters,
            listeners: Arc::new(Listeners::default()),
            base_path: String::new(),
            delay: Duration::ZERO,
            limiter: None,
            control: Arc::new(control),
            active: Arc::new(active),
        }
    }

    /// Per-worker pause after every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Global requests-per-second cap shared by all workers; 0 disables it.
    pub fn with_max_rate(mut self, rate: u32) -> Self {
        self.limiter = NonZeroU32::new(rate)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        self
    }

    pub fn on_match<F>(&mut self, callback: F)
    where
        F: Fn(Arc<Response>) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.listeners)
            .matched
            .push(Arc::new(callback));
    }

    pub fn on_miss<F>(&mut self, callback: F)
    where
        F: Fn(Arc<Response>) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.listeners)
            .missed
            .push(Arc::new(callback));
    }

    pub fn on_error<F>(&mut self, callback: F)
    where
        F: Fn(Arc<RequestError>) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.listeners)
            .errored
            .push(Arc::new(callback));
    }

    /// Prefix for every drawn word. Takes effect on the next [`Fuzzer::start`];
    /// a run already in flight keeps the prefix it started with.
    pub fn set_base_path(&mut self, path: impl Into<String>) {
        self.base_path = path.into();
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    pub fn state(&self) -> EngineState {
        *self.control.borrow()
    }

    /// True from `start` until the last worker of the run has exited.
    pub fn is_running(&self) -> bool {
        *self.active.borrow()
    }

    /// Launches `workers` tasks and returns immediately. Does nothing and
    /// returns `false` while a previous run still has live workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, workers: usize) -> bool {
        let launched = self.active.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        });
        if !launched {
            return false;
        }
        self.control.send_replace(EngineState::Running);

        let ctx = Arc::new(WorkerContext {
            requester: self.requester.clone(),
            dictionary: self.dictionary.clone(),
            filters: self.filters.clone(),
            listeners: self.listeners.clone(),
            base_path: self.base_path.clone(),
            delay: self.delay,
            limiter: self.limiter.clone(),
        });

        let workers = workers.max(1);
        debug!(workers, base_path = %ctx.base_path, "starting fuzzer run");
        let mut set = JoinSet::new();
        for id in 0..workers {
            set.spawn(run_worker(id, ctx.clone(), self.control.subscribe()));
        }

        let control = self.control.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    warn!(error = %e, "fuzzer worker failed");
                }
            }
            control.send_if_modified(|state| {
                if matches!(state, EngineState::Running | EngineState::Paused) {
                    *state = EngineState::Idle;
                    true
                } else {
                    false
                }
            });
            active.send_replace(false);
        });
        true
    }

    /// Asks every worker to exit after its current request. Wakes paused
    /// workers. Idempotent.
    pub fn stop(&self) {
        self.control.send_if_modified(|state| {
            if matches!(state, EngineState::Running | EngineState::Paused) {
                *state = EngineState::Stopped;
                true
            } else {
                false
            }
        });
    }

    pub fn pause(&self) {
        self.control.send_if_modified(|state| {
            if *state == EngineState::Running {
                *state = EngineState::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.control.send_if_modified(|state| {
            if *state == EngineState::Paused {
                *state = EngineState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Waits until every worker of the current run has exited. Returns
    /// `false` if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.active.subscribe();
        let done = async move {
            let _ = rx.wait_for(|active| !*active).await;
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, done).await.is_ok(),
            None => {
                done.await;
                true
            }
        }
    }
}

async fn run_worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    mut control: watch::Receiver<EngineState>,
) {
    loop {
        if let Some(limiter) = ctx.limiter.as_ref() {
            limiter.until_ready().await;
        }

        let state = match control.wait_for(|state| *state != EngineState::Paused).await {
            Ok(state) => *state,
            Err(_) => break,
        };
        if state != EngineState::Running {
            break;
        }

        let word = match ctx.dictionary.next() {
            Some(word) => word,
            None => break,
        };
        let path = format!("{}{}", ctx.base_path, word);

        match ctx.requester.request(&path, None).await {
            Ok(response) => {
                let response = Arc::new(response);
                let verdict = classifier::classify(&response, &ctx.filters);
                debug!(
                    worker = id,
                    path = %path,
                    status = response.status,
                    size = response.length,
                    verdict = ?verdict,
                    "request done"
                );
                match verdict {
                    Verdict::Hit => ctx.listeners.dispatch_match(&response),
                    Verdict::Miss => ctx.listeners.dispatch_miss(&response),
                }
            }
            Err(e) => {
                debug!(worker = id, path = %path, error = %e, "request failed");
                ctx.listeners.dispatch_error(&Arc::new(e));
            }
        }

        if !ctx.delay.is_zero() {
            tokio::time::sleep(ctx.delay).await;
        }
    }
    trace!(worker = id, "worker exited");
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::tests::MockRequester;

    fn words(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{i}")).collect()
    }

    fn not_found_filters() -> Arc<FilterSet> {
        Arc::new(FilterSet {
            exclude_status_codes: HashSet::from([404]),
            ..Default::default()
        })
    }

    #[derive(Default)]
    struct Seen {
        matched: Mutex<Vec<String>>,
        missed: Mutex<Vec<String>>,
        errors: Mutex<usize>,
    }

    impl Seen {
        fn total(&self) -> usize {
            self.matched.lock().unwrap().len()
                + self.missed.lock().unwrap().len()
                + *self.errors.lock().unwrap()
        }
    }

    fn wire(fuzzer: &mut Fuzzer) -> Arc<Seen> {
        let seen = Arc::new(Seen::default());
        let s = seen.clone();
        fuzzer.on_match(move |r| s.matched.lock().unwrap().push(r.path.clone()));
        let s = seen.clone();
        fuzzer.on_miss(move |r| s.missed.lock().unwrap().push(r.path.clone()));
        let s = seen.clone();
        fuzzer.on_error(move |_| *s.errors.lock().unwrap() += 1);
        seen
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_match_one_miss() {
        let requester = Arc::new(MockRequester::new(HashMap::from([("admin", 200)])));
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(["admin", "login"]).unwrap());
        let mut fuzzer = Fuzzer::new(requester.clone(), dict, not_found_filters());
        let seen = wire(&mut fuzzer);

        assert!(fuzzer.start(2));
        assert!(fuzzer.wait(Some(Duration::from_secs(5))).await);

        assert_eq!(*seen.matched.lock().unwrap(), vec!["admin".to_string()]);
        assert_eq!(*seen.missed.lock().unwrap(), vec!["login".to_string()]);
        assert_eq!(*seen.errors.lock().unwrap(), 0);
        assert_eq!(fuzzer.state(), EngineState::Idle);
        assert!(!fuzzer.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_run_requests_every_word_once() {
        let requester = Arc::new(MockRequester::new(HashMap::new()));
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(words(500)).unwrap());
        let mut fuzzer = Fuzzer::new(requester.clone(), dict, not_found_filters());
        let seen = wire(&mut fuzzer);

        fuzzer.start(16);
        assert!(fuzzer.wait(None).await);

        let requested = requester.requested();
        let unique: HashSet<&String> = requested.iter().collect();
        assert_eq!(requested.len(), 500);
        assert_eq!(unique.len(), 500);
        assert_eq!(seen.missed.lock().unwrap().len(), 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn transport_errors_do_not_end_workers() {
        let requester =
            Arc::new(MockRequester::new(HashMap::from([("w3", 200)])).failing(["w0", "w1", "w2"]));
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(words(10)).unwrap());
        let mut fuzzer = Fuzzer::new(requester.clone(), dict, not_found_filters());
        let seen = wire(&mut fuzzer);

        fuzzer.start(1);
        fuzzer.wait(None).await;

        assert_eq!(*seen.errors.lock().unwrap(), 3);
        assert_eq!(seen.matched.lock().unwrap().len(), 1);
        assert_eq!(seen.missed.lock().unwrap().len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pause_holds_workers_until_resume() {
        let requester = Arc::new(
            MockRequester::new(HashMap::new()).with_latency(Duration::from_millis(5)),
        );
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(words(200)).unwrap());
        let mut fuzzer = Fuzzer::new(requester.clone(), dict, not_found_filters());
        let seen = wire(&mut fuzzer);

        fuzzer.start(4);
        tokio::time::sleep(Duration::from_millis(30)).await;
        fuzzer.pause();
        assert_eq!(fuzzer.state(), EngineState::Paused);
        // let in-flight requests settle
        tokio::time::sleep(Duration::from_millis(50)).await;
        let held = seen.total();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.total(), held);
        assert!(held < 200);
        assert!(!fuzzer.wait(Some(Duration::from_millis(10))).await);

        fuzzer.resume();
        assert!(fuzzer.wait(Some(Duration::from_secs(10))).await);
        let requested = requester.requested();
        let unique: HashSet<&String> = requested.iter().collect();
        assert_eq!(requested.len(), 200);
        assert_eq!(unique.len(), 200);
        assert_eq!(seen.total(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_wakes_paused_workers() {
        let requester = Arc::new(
            MockRequester::new(HashMap::new()).with_latency(Duration::from_millis(5)),
        );
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(words(1000)).unwrap());
        let fuzzer = Fuzzer::new(requester.clone(), dict, not_found_filters());

        fuzzer.start(4);
        tokio::time::sleep(Duration::from_millis(20)).await;
        fuzzer.pause();
        fuzzer.stop();
        fuzzer.stop();
        assert_eq!(fuzzer.state(), EngineState::Stopped);
        assert!(fuzzer.wait(Some(Duration::from_secs(5))).await);
        assert!(requester.requested().len() < 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn start_is_a_noop_while_running_and_engine_is_reusable() {
        let requester = Arc::new(
            MockRequester::new(HashMap::from([("admin/login", 200)]))
                .with_latency(Duration::from_millis(2)),
        );
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(["login", "logout", "index"]).unwrap());
        let mut fuzzer = Fuzzer::new(requester.clone(), dict.clone(), not_found_filters());
        let seen = wire(&mut fuzzer);

        assert!(fuzzer.start(1));
        assert!(!fuzzer.start(1));
        assert!(fuzzer.wait(None).await);

        dict.reset();
        fuzzer.set_base_path("admin/");
        assert!(fuzzer.start(2));
        assert!(fuzzer.wait(None).await);

        let requested: HashSet<String> = requester.requested().into_iter().collect();
        assert_eq!(requested.len(), 6);
        assert!(requested.contains("admin/logout"));
        assert_eq!(*seen.matched.lock().unwrap(), vec!["admin/login".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_times_out_on_slow_runs() {
        let requester = Arc::new(
            MockRequester::new(HashMap::new()).with_latency(Duration::from_millis(50)),
        );
        requester.bind("https://example.com").unwrap();
        let dict = Arc::new(Dictionary::from_words(words(100)).unwrap());
        let fuzzer = Fuzzer::new(requester, dict, not_found_filters())
            .with_delay(Duration::from_millis(10));

        fuzzer.start(1);
        assert!(!fuzzer.wait(Some(Duration::from_millis(20))).await);
        assert!(fuzzer.is_running());
        fuzzer.stop();
        assert!(fuzzer.wait(Some(Duration::from_secs(5))).await);
    }

    #[tokio::test]
    async fn wait_without_a_run_returns_immediately() {
        let requester = Arc::new(MockRequester::new(HashMap::new()));
        let dict = Arc::new(Dictionary::from_words(["a"]).unwrap());
        let fuzzer =
            Fuzzer::new(requester, dict, Arc::new(FilterSet::default())).with_max_rate(100);
        assert!(fuzzer.wait(Some(Duration::from_millis(1))).await);
        assert_eq!(fuzzer.state(), EngineState::Idle);
    }
}
