//! Scheduler module for running probers and aggregating their results.
//!
//! Each target gets a prober task feeding a worker task, which records every
//! result in the target's aggregator. Full batches go to a shared sink.

use crate::config::{ConfigError, MonitorConfig};
use crate::models::{PingResult, Scheme, Target};
use crate::probe::{HttpProbe, IcmpProbe, Probe, ProbeError, Prober, ProberState, Unreachable};
use crate::stats::{Aggregator, BatchSink};

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors that end a monitoring run or reject a target.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Unreachable(#[from] Unreachable),
    #[error("{0}: target already monitored")]
    Duplicate(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{target}: {source}")]
    Probe { target: String, source: ProbeError },
}

/// A running target: its prober, aggregator and result worker.
struct Unit {
    prober: Prober,
    aggregator: Arc<Aggregator>,
    worker: JoinHandle<()>,
}

/// Owns every prober and aggregator for the lifetime of a run.
pub struct Scheduler {
    config: MonitorConfig,
    sink: Arc<dyn BatchSink>,
    cancel: CancellationToken,
    units: HashMap<String, Unit>,
    fatal_tx: mpsc::UnboundedSender<Unreachable>,
    fatal_rx: mpsc::UnboundedReceiver<Unreachable>,
}

impl Scheduler {
    /// Create a scheduler handing full batches to `sink`.
    pub fn new(config: MonitorConfig, sink: Arc<dyn BatchSink>) -> Result<Self, MonitorError> {
        config.validate()?;
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            sink,
            cancel: CancellationToken::new(),
            units: HashMap::new(),
            fatal_tx,
            fatal_rx,
        })
    }

    /// Start monitoring `target` with the probe matching its scheme.
    pub fn add_target(&mut self, target: Target) -> Result<(), MonitorError> {
        if self.units.contains_key(&target.name()) {
            return Err(MonitorError::Duplicate(target.name()));
        }
        match target.scheme {
            Scheme::Http | Scheme::Https => {
                let probe = HttpProbe::new(target.clone()).map_err(|source| MonitorError::Probe {
                    target: target.name(),
                    source,
                })?;
                self.add_probe(target, probe)
            }
            Scheme::Icmp => {
                let probe = IcmpProbe::new(target.clone());
                self.add_probe(target, probe)
            }
        }
    }

    /// Start monitoring `target` with a caller-supplied probe.
    pub fn add_probe<P: Probe>(&mut self, target: Target, probe: P) -> Result<(), MonitorError> {
        let name = target.name();
        if self.units.contains_key(&name) {
            return Err(MonitorError::Duplicate(name));
        }

        let aggregator = Arc::new(Aggregator::new(
            &target,
            self.config.batch_size,
            self.config.flush_trigger,
            self.sink.clone(),
        ));
        let (prober, results) = Prober::spawn(
            &target,
            probe,
            self.config.max_failures,
            self.cancel.child_token(),
            self.fatal_tx.clone(),
        );
        let worker = tokio::spawn(run_worker(results, aggregator.clone()));

        tracing::info!("Scheduler: Adding target {}", name);
        self.units.insert(
            name,
            Unit {
                prober,
                aggregator,
                worker,
            },
        );
        Ok(())
    }

    /// Names of all monitored targets.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn aggregator(&self, name: &str) -> Option<Arc<Aggregator>> {
        self.units.get(name).map(|u| u.aggregator.clone())
    }

    pub fn state(&self, name: &str) -> Option<ProberState> {
        self.units.get(name).map(|u| u.prober.state())
    }

    /// Wait for the first target to become unreachable.
    ///
    /// Pends forever while every prober is healthy.
    pub async fn fatal(&mut self) -> Unreachable {
        match self.fatal_rx.recv().await {
            Some(e) => e,
            // The scheduler holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Stop every prober, wait for all workers, then hand off partial batches
    /// if configured to.
    pub async fn stop(mut self) {
        tracing::info!("Scheduler: stopping {} targets", self.units.len());
        self.cancel.cancel();

        let units: Vec<Unit> = self.units.drain().map(|(_, u)| u).collect();
        let mut aggregators = Vec::with_capacity(units.len());
        for unit in units {
            unit.prober.stop().await;
            if let Err(e) = unit.worker.await {
                tracing::error!("{}: worker panicked: {}", unit.aggregator.target(), e);
            }
            aggregators.push(unit.aggregator);
        }

        if self.config.flush_on_stop {
            for agg in aggregators {
                if let Some(batch) = agg.drain() {
                    tracing::info!("{}: flushing {} buffered samples", agg.target(), batch.aligned_len());
                    self.sink.submit(batch);
                }
            }
        }
    }
}

/// Record results for one target until its prober closes the channel.
async fn run_worker(mut results: mpsc::Receiver<PingResult>, aggregator: Arc<Aggregator>) {
    while let Some(result) = results.recv().await {
        if let Err(e) = aggregator.record(&result) {
            tracing::error!("{}", e);
        }
    }
    tracing::debug!("{}: worker done after {} samples", aggregator.target(), aggregator.appended());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Cycle;
    use crate::stats::Batch;
    use std::sync::Mutex;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(5);

    #[derive(Default)]
    struct Collect(Mutex<Vec<Batch>>);

    impl BatchSink for Collect {
        fn submit(&self, batch: Batch) {
            self.0.lock().unwrap().push(batch);
        }
    }

    struct Steady;

    impl Probe for Steady {
        async fn ping(&mut self, cycle: &Cycle<'_>) -> Result<PingResult, ProbeError> {
            cycle.enter(ProberState::AwaitingResponse)?;
            Ok(PingResult::Icmp { rtt: Duration::from_micros(250) })
        }
    }

    struct Dead;

    impl Probe for Dead {
        async fn ping(&mut self, cycle: &Cycle<'_>) -> Result<PingResult, ProbeError> {
            cycle.enter(ProberState::Connecting)?;
            Err(ProbeError::Network("unreachable".into()))
        }
    }

    fn config(batch_size: usize) -> MonitorConfig {
        MonitorConfig {
            interval: TICK,
            batch_size,
            ..Default::default()
        }
    }

    fn icmp(host: &str) -> Target {
        Target::new(Scheme::Icmp, host, 0, TICK, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_rejects_duplicates() {
        let sink = Arc::new(Collect::default());
        let mut sched = Scheduler::new(config(10), sink).unwrap();

        sched.add_probe(icmp("192.0.2.1"), Steady).unwrap();
        assert!(matches!(
            sched.add_probe(icmp("192.0.2.1"), Steady),
            Err(MonitorError::Duplicate(_))
        ));
        assert_eq!(sched.targets().count(), 1);
        sched.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let sink = Arc::new(Collect::default());
        assert!(matches!(
            Scheduler::new(config(0), sink),
            Err(MonitorError::Config(ConfigError::Zero(_)))
        ));
    }

    #[tokio::test]
    async fn test_stop_flushes_and_freezes() {
        let sink = Arc::new(Collect::default());
        let mut sched = Scheduler::new(config(4), sink.clone()).unwrap();
        sched.add_probe(icmp("192.0.2.1"), Steady).unwrap();
        sched.add_probe(icmp("192.0.2.2"), Steady).unwrap();

        let agg = sched.aggregator("icmp:192.0.2.1").unwrap();
        while agg.appended() < 6 {
            tokio::time::sleep(TICK).await;
        }
        sched.stop().await;

        let appended = agg.appended();
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(agg.appended(), appended);
        assert_eq!(agg.pending(), 0);

        let batches = sink.0.lock().unwrap();
        let mine: usize = batches
            .iter()
            .filter(|b| b.target == "icmp:192.0.2.1")
            .map(|b| b.aligned_len())
            .sum();
        assert_eq!(mine as u64, appended);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_fatal() {
        let sink = Arc::new(Collect::default());
        let mut sched = Scheduler::new(config(10), sink).unwrap();
        sched.add_probe(icmp("192.0.2.1"), Steady).unwrap();
        sched.add_probe(icmp("192.0.2.9"), Dead).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), sched.fatal())
            .await
            .unwrap();
        assert_eq!(err.target, "icmp:192.0.2.9");
        assert_eq!(err.failures, 4);

        let err: MonitorError = err.into();
        assert!(matches!(err, MonitorError::Unreachable(_)));
        sched.stop().await;
    }
}
