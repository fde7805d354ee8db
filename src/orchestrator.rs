use std::{sync::Arc, thread};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{error, info};

use crate::config::Config;
use crate::session::{LeaseSession, ProtocolError, SessionOutcome, SessionState};

#[derive(Debug)]
pub struct SessionReport {
    pub id: usize,
    pub outcome: SessionOutcome,
}

/// Tally of how a batch of sessions ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub granted: usize,
    pub denied: usize,
    pub errored: usize,
    pub timed_out: usize,
}

impl Summary {
    pub fn from_reports(reports: &[SessionReport]) -> Self {
        reports
            .iter()
            .fold(Summary::default(), |mut summary, report| {
                match report.outcome.state() {
                    SessionState::Granted => summary.granted += 1,
                    SessionState::Denied => summary.denied += 1,
                    SessionState::TimedOut => summary.timed_out += 1,
                    _ => summary.errored += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.granted + self.denied + self.errored + self.timed_out
    }
}

/// Runs batches of independent lease sessions, one thread per client.
pub struct Orchestrator {
    config: Arc<Config>,
    rng: StdRng,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    pub fn with_rng(config: Arc<Config>, rng: StdRng) -> Self {
        Self { config, rng }
    }

    /// Launch `count` sessions numbered from 1, wait for all of them, and
    /// return their outcomes in id order.
    ///
    /// Every thread is spawned before any is joined. A session that panics or
    /// cannot be spawned is reported as aborted without touching the others.
    pub fn run_all(&mut self, count: usize) -> Vec<SessionReport> {
        let config: &Config = &self.config;

        // drawn here so sessions never share a generator
        let session_rngs: Vec<StdRng> = (0..count)
            .map(|_| StdRng::seed_from_u64(self.rng.gen()))
            .collect();

        info!(count, server = %config.server, "launching sessions");

        thread::scope(|s| {
            let handles: Vec<_> = (1..=count)
                .zip(session_rngs)
                .map(|(id, rng)| {
                    let spawned = thread::Builder::new()
                        .name(format!("client-{id}"))
                        .spawn_scoped(s, move || LeaseSession::new(config, rng).run(id));
                    (id, spawned)
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, spawned)| {
                    let outcome = match spawned {
                        Ok(handle) => handle.join().unwrap_or_else(|_| {
                            error!(client = id, "session thread panicked");
                            aborted("session thread panicked".to_string())
                        }),
                        Err(e) => {
                            error!(client = id, %e, "failed to spawn session thread");
                            aborted(format!("failed to spawn session thread: {e}"))
                        }
                    };
                    SessionReport { id, outcome }
                })
                .collect()
        })
    }
}

fn aborted(reason: String) -> SessionOutcome {
    SessionOutcome::ProtocolError(ProtocolError::Aborted(reason))
}
