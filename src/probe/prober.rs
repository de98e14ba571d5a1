//! Per-target probe loop with the consecutive-failure policy.

use super::{Cycle, Probe, ProbeError, ProberState};
use crate::models::{PingResult, Target};

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A target failed more times in a row than its prober tolerates.
#[derive(Error, Debug)]
#[error("{target}: unreachable after {failures} consecutive failures: {last}")]
pub struct Unreachable {
    pub target: String,
    pub failures: u32,
    pub last: ProbeError,
}

/// Handle to a running probe loop.
pub struct Prober {
    name: String,
    cancel: CancellationToken,
    state: watch::Receiver<ProberState>,
    handle: JoinHandle<()>,
}

impl Prober {
    /// Start probing `target` every `target.interval`.
    ///
    /// Results arrive on the returned depth-1 channel, which closes when the
    /// loop exits. More than `max_failures` consecutive failures end the loop
    /// and report an [`Unreachable`] on `fatal`.
    pub fn spawn<P: Probe>(
        target: &Target,
        probe: P,
        max_failures: u32,
        cancel: CancellationToken,
        fatal: mpsc::UnboundedSender<Unreachable>,
    ) -> (Self, mpsc::Receiver<PingResult>) {
        let (results, rx) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(ProberState::Idle);
        let name = target.name();

        let probe_loop = ProbeLoop {
            name: name.clone(),
            interval: target.interval,
            max_failures,
            cancel: cancel.clone(),
            state: state_tx,
            results,
            fatal,
        };
        let handle = tokio::spawn(probe_loop.run(probe));

        (
            Self {
                name,
                cancel,
                state,
                handle,
            },
            rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current position in the measurement cycle.
    pub fn state(&self) -> ProberState {
        *self.state.borrow()
    }

    /// Watch state transitions; outlives the prober handle.
    pub fn subscribe(&self) -> watch::Receiver<ProberState> {
        self.state.clone()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("{}: probe loop panicked: {}", self.name, e);
        }
    }
}

struct ProbeLoop {
    name: String,
    interval: Duration,
    max_failures: u32,
    cancel: CancellationToken,
    state: watch::Sender<ProberState>,
    results: mpsc::Sender<PingResult>,
    fatal: mpsc::UnboundedSender<Unreachable>,
}

impl ProbeLoop {
    async fn run<P: Probe>(self, mut probe: P) {
        tracing::info!("{}: probing every {:?}", self.name, self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.state.send_replace(ProberState::Idle);
            let cycle = Cycle::new(&self.cancel, &self.state);
            match probe.ping(&cycle).await {
                Ok(result) => {
                    failures = 0;
                    tracing::debug!("{}: {}", self.name, result);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        sent = self.results.send(result) => {
                            if sent.is_err() {
                                tracing::debug!("{}: result receiver closed", self.name);
                                break;
                            }
                        }
                    }
                }
                Err(ProbeError::Cancelled) => break,
                Err(e) => {
                    failures += 1;
                    if failures > self.max_failures {
                        tracing::error!("{}: giving up after {} consecutive failures: {}", self.name, failures, e);
                        let _ = self.fatal.send(Unreachable {
                            target: self.name.clone(),
                            failures,
                            last: e,
                        });
                        break;
                    }
                    tracing::warn!("{}: ping failed ({}/{}): {}", self.name, failures, self.max_failures, e);
                }
            }
            self.state.send_replace(ProberState::Sleeping);
        }

        self.state.send_replace(ProberState::Stopped);
        tracing::info!("{}: prober stopped", self.name);
    }
}
