mod state;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::FilterSet;
use crate::dictionary::Dictionary;
use crate::fuzzer::Fuzzer;
use crate::output::{self, ViewOptions};
use crate::requester::{join_url, RequestError, Requester, Response};

use state::{normalize_dir, parent_dirs, ScanState};

/// Consecutive request errors tolerated before a target is abandoned.
pub const MAX_CONSECUTIVE_REQUEST_ERRORS: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum RecursionMode {
    #[default]
    Off,
    /// Queue every matched path as a directory.
    Plain,
    /// Like `Plain`, plus every intermediate parent of the match.
    Deep,
    /// Like `Plain`, ignoring the recursion status codes.
    Forced,
}

impl RecursionMode {
    pub fn is_enabled(&self) -> bool {
        *self != Self::Off
    }
}

#[derive(Clone, Debug)]
pub struct ScanOptions {
    pub workers: usize,
    pub recursion: RecursionMode,
    /// 0 means unlimited. Seed directories sit at depth 0.
    pub max_recursion_depth: usize,
    /// Statuses that make a hit eligible for recursion; empty means all.
    pub recursion_status_codes: HashSet<u16>,
    pub subdirs: Vec<String>,
    pub exclude_subdirs: Vec<String>,
    pub delay: Duration,
    pub max_rate: u32,
    pub max_consecutive_errors: usize,
    pub skip_on_status: HashSet<u16>,
    pub max_time: Option<Duration>,
    pub exit_on_error: bool,
    pub replay_proxy: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 25,
            recursion: RecursionMode::Off,
            max_recursion_depth: 0,
            recursion_status_codes: HashSet::new(),
            subdirs: Vec::new(),
            exclude_subdirs: Vec::new(),
            delay: Duration::ZERO,
            max_rate: 0,
            max_consecutive_errors: MAX_CONSECUTIVE_REQUEST_ERRORS,
            skip_on_status: HashSet::new(),
            max_time: None,
            exit_on_error: false,
            replay_proxy: None,
        }
    }
}

/// Operator requests accepted while a scan is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    SkipTarget,
    Quit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TargetOutcome {
    Completed,
    CircuitBreakerTripped,
    SkippedOnStatus(u16),
    TimedOut,
    Skipped,
    Quit,
}

#[derive(Clone, Debug)]
pub struct TargetReport {
    pub target: String,
    pub hits: Vec<Arc<Response>>,
    pub errors: usize,
    pub consecutive_errors: usize,
    pub directories: Vec<String>,
    pub outcome: TargetOutcome,
}

#[derive(Clone, Debug)]
pub struct ScanReport {
    pub targets: Vec<TargetReport>,
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn hit_count(&self) -> usize {
        self.targets.iter().map(|t| t.hits.len()).sum()
    }

    pub fn error_count(&self) -> usize {
        self.targets.iter().map(|t| t.errors).sum()
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid target {target}: {source}")]
    Bind {
        target: String,
        #[source]
        source: RequestError,
    },

    #[error("aborting scan of {target} after a request error: {source}")]
    RequestFailed {
        target: String,
        #[source]
        source: Arc<RequestError>,
    },
}

#[derive(Debug)]
enum ScanEvent {
    Matched(Arc<Response>),
    Missed(Arc<Response>),
    Failed(Arc<RequestError>),
}

/// Drives the fuzzer over every target and every discovered directory.
///
/// Engine callbacks only forward outcomes into a channel; queue, counters
/// and hits are owned by the task running [`Controller::run`].
pub struct Controller {
    requester: Arc<dyn Requester>,
    dictionary: Arc<Dictionary>,
    fuzzer: Fuzzer,
    options: ScanOptions,
    events: mpsc::UnboundedReceiver<ScanEvent>,
    commands: Option<mpsc::Receiver<Command>>,
    pb: ProgressBar,
    view: ViewOptions,
    deadline: Option<Instant>,
}

impl Controller {
    pub fn new(
        requester: Arc<dyn Requester>,
        dictionary: Arc<Dictionary>,
        filters: FilterSet,
        options: ScanOptions,
    ) -> Self {
        let mut fuzzer = Fuzzer::new(requester.clone(), dictionary.clone(), Arc::new(filters))
            .with_delay(options.delay)
            .with_max_rate(options.max_rate);

        let (tx, events) = mpsc::unbounded_channel();
        let matched = tx.clone();
        fuzzer.on_match(move |r| {
            let _ = matched.send(ScanEvent::Matched(r));
        });
        let missed = tx.clone();
        fuzzer.on_miss(move |r| {
            let _ = missed.send(ScanEvent::Missed(r));
        });
        fuzzer.on_error(move |e| {
            let _ = tx.send(ScanEvent::Failed(e));
        });

        Self {
            requester,
            dictionary,
            fuzzer,
            options,
            events,
            commands: None,
            pb: ProgressBar::hidden(),
            view: ViewOptions::default(),
            deadline: None,
        }
    }

    /// Hits are printed above this bar.
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    pub fn with_view(mut self, view: ViewOptions) -> Self {
        self.view = view;
        self
    }

    pub fn with_commands(mut self, commands: mpsc::Receiver<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn fuzzer(&self) -> &Fuzzer {
        &self.fuzzer
    }

    /// Scans the targets one after another. A timeout or a quit request ends
    /// the whole run; the remaining targets are not visited.
    pub async fn run(&mut self, targets: &[String]) -> Result<ScanReport, ControllerError> {
        let started = Instant::now();
        self.deadline = self.options.max_time.map(|t| started + t);

        let mut reports = Vec::new();
        for target in targets {
            let report = self.scan_target(target).await?;
            let halt = matches!(report.outcome, TargetOutcome::TimedOut | TargetOutcome::Quit);
            reports.push(report);
            if halt {
                break;
            }
        }
        Ok(ScanReport {
            targets: reports,
            elapsed: started.elapsed(),
        })
    }

    pub async fn scan_target(&mut self, target: &str) -> Result<TargetReport, ControllerError> {
        self.requester
            .bind(target)
            .map_err(|e| ControllerError::Bind {
                target: target.to_string(),
                source: e,
            })?;
        info!(url = %target, "scanning target");

        let mut state = ScanState::new(target);
        if self.options.subdirs.is_empty() {
            state.add_directory("", 0, &self.options.exclude_subdirs);
        } else {
            for subdir in self.options.subdirs.iter() {
                state.add_directory(subdir, 0, &self.options.exclude_subdirs);
            }
        }

        let mut outcome = TargetOutcome::Completed;
        let mut failure: Option<ControllerError> = None;
        while let Some(dir) = state.queue.pop_front() {
            if self.deadline_passed() {
                outcome = TargetOutcome::TimedOut;
                break;
            }
            debug!(url = %target, directory = %dir.path, depth = dir.depth, "scanning directory");
            self.pb.set_length(self.dictionary.len() as u64);
            self.pb.set_position(0);
            self.pb.set_message(join_url(target, &dir.path));

            state.current = dir.clone();
            self.fuzzer.set_base_path(dir.path.clone());
            self.fuzzer.start(self.options.workers);
            let step = self.drive(&mut state).await;
            self.dictionary.reset();
            state.scanned.push(dir.path);

            match step {
                Ok(None) => {}
                Ok(Some(o)) => {
                    outcome = o;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // replays still use the current binding
        while state.replays.join_next().await.is_some() {}

        if let Some(e) = failure {
            return Err(e);
        }
        if !state.queue.is_empty() {
            debug!(url = %target, left = state.queue.len(), "abandoning queued directories");
        }
        info!(
            url = %target,
            hits = state.hits.len(),
            errors = state.errors,
            outcome = ?outcome,
            "target finished"
        );
        Ok(TargetReport {
            target: state.target,
            hits: state.hits,
            errors: state.errors,
            consecutive_errors: state.consecutive_errors,
            directories: state.scanned,
            outcome,
        })
    }

    // Runs until the fuzzer's current pass is over. Returns the outcome that
    // ends the target early, if any.
    async fn drive(
        &mut self,
        state: &mut ScanState,
    ) -> Result<Option<TargetOutcome>, ControllerError> {
        let mut early: Option<TargetOutcome> = None;
        let mut failure: Option<ControllerError> = None;
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => {
                    self.handle_event(state, event, &mut early, &mut failure);
                }
                command = next_command(&mut self.commands) => match command {
                    Some(command) => self.handle_command(command, &mut early),
                    None => self.commands = None,
                },
                _ = sleep_until(self.deadline), if early.is_none() => {
                    warn!(url = %state.target, "maximum scan time reached");
                    self.fuzzer.stop();
                    early = Some(TargetOutcome::TimedOut);
                }
                _ = self.fuzzer.wait(None) => break,
            }
        }

        // workers are gone; whatever they sent is already queued
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(state, event, &mut early, &mut failure);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(early),
        }
    }

    fn handle_event(
        &mut self,
        state: &mut ScanState,
        event: ScanEvent,
        early: &mut Option<TargetOutcome>,
        failure: &mut Option<ControllerError>,
    ) {
        self.pb.inc(1);
        match event {
            ScanEvent::Matched(response) => {
                state.consecutive_errors = 0;
                if self.skip_status(&response, early) {
                    return;
                }
                self.pb.println(output::format_hit(&response, &self.view));
                self.replay(state, &response);
                if early.is_none() && failure.is_none() {
                    self.recurse(state, &response);
                }
                state.hits.push(response);
            }
            ScanEvent::Missed(response) => {
                state.consecutive_errors = 0;
                self.skip_status(&response, early);
            }
            ScanEvent::Failed(error) => {
                state.errors += 1;
                state.consecutive_errors += 1;
                debug!(url = %state.target, error = %error, "request error");
                if failure.is_some() || early.is_some() {
                    return;
                }
                if self.options.exit_on_error {
                    self.fuzzer.stop();
                    *failure = Some(ControllerError::RequestFailed {
                        target: state.target.clone(),
                        source: error,
                    });
                } else if state.consecutive_errors > self.options.max_consecutive_errors {
                    warn!(
                        url = %state.target,
                        errors = state.consecutive_errors,
                        "too many consecutive request errors, skipping target"
                    );
                    self.fuzzer.stop();
                    *early = Some(TargetOutcome::CircuitBreakerTripped);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command, early: &mut Option<TargetOutcome>) {
        debug!(command = ?command, "operator command");
        match command {
            Command::Pause => self.fuzzer.pause(),
            Command::Resume => self.fuzzer.resume(),
            Command::SkipTarget => {
                self.fuzzer.stop();
                early.get_or_insert(TargetOutcome::Skipped);
            }
            Command::Quit => {
                self.fuzzer.stop();
                *early = Some(TargetOutcome::Quit);
            }
        }
    }

    fn skip_status(&self, response: &Response, early: &mut Option<TargetOutcome>) -> bool {
        if !self.options.skip_on_status.contains(&response.status) {
            return false;
        }
        if early.is_none() {
            warn!(status = response.status, path = %response.path, "skipping target on status");
            self.fuzzer.stop();
            *early = Some(TargetOutcome::SkippedOnStatus(response.status));
        }
        true
    }

    fn replay(&self, state: &mut ScanState, response: &Response) {
        let proxy = match self.options.replay_proxy.as_ref() {
            Some(proxy) => proxy.clone(),
            None => return,
        };
        let requester = self.requester.clone();
        let path = response.path.clone();
        state.replays.spawn(async move {
            if let Err(e) = requester.request(&path, Some(&proxy)).await {
                debug!(path = %path, error = %e, "replay request failed");
            }
        });
    }

    fn recurse(&self, state: &mut ScanState, response: &Response) {
        let mode = self.options.recursion;
        if !mode.is_enabled() {
            return;
        }
        if mode != RecursionMode::Forced
            && !self.options.recursion_status_codes.is_empty()
            && !self.options.recursion_status_codes.contains(&response.status)
        {
            return;
        }
        let depth = state.current.depth + 1;
        if self.options.max_recursion_depth > 0 && depth > self.options.max_recursion_depth {
            return;
        }
        let path = normalize_dir(&response.path);
        if path.is_empty() {
            return;
        }
        let excluded = &self.options.exclude_subdirs;
        if mode == RecursionMode::Deep {
            for parent in parent_dirs(&path) {
                state.add_directory(&parent, depth, excluded);
            }
        }
        if state.add_directory(&path, depth, excluded) {
            debug!(directory = %path, depth, "queued directory");
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

async fn next_command(commands: &mut Option<mpsc::Receiver<Command>>) -> Option<Command> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
