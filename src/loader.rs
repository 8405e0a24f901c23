//! Background request execution.
//!
//! The UI thread never blocks on the network. Each request becomes a [`Job`]
//! that runs on its own worker thread and hands a [`Completion`] back over an
//! mpsc channel; the UI thread drains the channel on every idle tick. The
//! `Inline` mode runs jobs on the calling thread instead, which keeps CLI
//! subcommands and tests deterministic while using the same delivery path.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::client::ClientResult;
use crate::commit::CommitReport;
use crate::error::{CommitResult, CrosswalkError};
use crate::model::{Document, Element, RelationshipType};
use crate::session::{TargetLoad, Ticket};

/// Document list plus relationship-type catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub documents: Vec<Document>,
    pub relationship_types: Vec<RelationshipType>,
}

/// Result of one finished job.
#[derive(Debug)]
pub enum Completion {
    Catalog(ClientResult<Catalog>),
    Target {
        ticket: Ticket,
        doc: String,
        result: ClientResult<TargetLoad>,
    },
    Source {
        ticket: Ticket,
        doc: String,
        result: ClientResult<Vec<Element>>,
    },
    Commit(CommitResult<CommitReport>),
    Export(Result<PathBuf, CrosswalkError>),
}

pub type Job = Box<dyn FnOnce() -> Completion + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// One worker thread per job.
    #[default]
    Threaded,
    /// Run on the submitting thread.
    Inline,
}

pub struct Loader {
    mode: LoadMode,
    tx: mpsc::Sender<Completion>,
    rx: mpsc::Receiver<Completion>,
    in_flight: usize,
}

impl Loader {
    pub fn new(mode: LoadMode) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            mode,
            tx,
            rx,
            in_flight: 0,
        }
    }

    /// Jobs submitted whose completion has not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Run `job`. `name` labels the worker thread and the log line.
    pub fn submit(&mut self, name: &'static str, job: Job) {
        self.in_flight += 1;
        match self.mode {
            LoadMode::Inline => {
                let _ = self.tx.send(job());
            }
            LoadMode::Threaded => {
                let tx = self.tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("crosswalk-{name}"))
                    .spawn(move || {
                        let _ = tx.send(job());
                    });
                if let Err(e) = spawned {
                    tracing::error!(job = name, error = %e, "failed to spawn worker thread");
                    self.in_flight -= 1;
                    return;
                }
            }
        }
        tracing::debug!(job = name, mode = ?self.mode, "job submitted");
    }

    /// Everything finished so far, without blocking.
    pub fn drain(&mut self) -> Vec<Completion> {
        let done: Vec<Completion> = self.rx.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(done.len());
        done
    }

    /// Block up to `timeout` for the next completion.
    pub fn wait(&mut self, timeout: Duration) -> Option<Completion> {
        let done = self.rx.recv_timeout(timeout).ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(done)
    }
}

/// Quiet-period timer: fires once after the last `touch` of a burst.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    last_touch: Option<Instant>,
}

/// Search input quiet period.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_touch: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_touch = Some(now);
    }

    pub fn cancel(&mut self) {
        self.last_touch = None;
    }

    /// `true` exactly once per burst, when the quiet period has elapsed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last_touch {
            Some(t) if now.saturating_duration_since(t) >= self.quiet => {
                self.last_touch = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_jobs_complete_before_submit_returns() {
        let mut loader = Loader::new(LoadMode::Inline);
        loader.submit("catalog", Box::new(|| Completion::Catalog(Ok(Catalog::default()))));
        assert_eq!(loader.in_flight(), 1);
        let done = loader.drain();
        assert_eq!(done.len(), 1);
        assert!(matches!(done[0], Completion::Catalog(Ok(_))));
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn threaded_jobs_arrive_over_the_channel() {
        let mut loader = Loader::new(LoadMode::Threaded);
        loader.submit("catalog", Box::new(|| Completion::Catalog(Ok(Catalog::default()))));
        let done = loader.wait(Duration::from_secs(5));
        assert!(matches!(done, Some(Completion::Catalog(Ok(_)))));
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn debouncer_fires_once_per_burst() {
        let mut d = Debouncer::new(Duration::from_millis(300));
        let t0 = Instant::now();
        assert!(!d.ready(t0));
        d.touch(t0);
        d.touch(t0 + Duration::from_millis(200));
        assert!(!d.ready(t0 + Duration::from_millis(400)));
        assert!(d.ready(t0 + Duration::from_millis(500)));
        assert!(!d.ready(t0 + Duration::from_millis(900)));
    }
}
