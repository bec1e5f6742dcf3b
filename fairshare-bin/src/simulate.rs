//! Runs a simulated cluster: several throttlers share one in-process
//! coordinator while worker tasks push traffic through them.

use anyhow::{Context, Result};
use fairshare_lib::{
    BinName, BinSet, MemoryCoordinator, PollDriver, PoolStats, ThrottleError, ThrottleGroup,
    Throttler, ThrottlerConfig,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};

use crate::options::{Config, GroupConfig};

/// Everything a simulation run needs, resolved from the configuration
#[derive(Debug, Clone)]
pub(crate) struct Simulation {
    peers: usize,
    workers: usize,
    duration: Duration,
    throttler: ThrottlerConfig,
    groups: BTreeMap<ThrottleGroup, GroupConfig>,
}

impl From<&Config> for Simulation {
    fn from(config: &Config) -> Self {
        Self {
            peers: config.peers(),
            workers: config.workers(),
            duration: config.duration(),
            throttler: config.throttler_config(),
            groups: config.groups.clone(),
        }
    }
}

/// The outcome of a simulation run
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    /// Wall-clock time the workers ran
    #[serde(with = "humantime_serde")]
    pub(crate) elapsed: Duration,

    /// One entry per cluster member, in start order
    pub(crate) peers: Vec<PeerReport>,
}

impl Report {
    pub(crate) fn failures(&self) -> u64 {
        self.peers.iter().map(|peer| peer.failures).sum()
    }
}

/// What one cluster member did
#[derive(Debug, Default, Serialize)]
pub(crate) struct PeerReport {
    /// Completed fetches across all groups
    pub(crate) fetches: u64,

    /// Workers that stopped on a throttling error
    pub(crate) failures: u64,

    /// Statistics of every pool at the end of the run
    pub(crate) groups: BTreeMap<ThrottleGroup, PoolStats>,
}

/// The work of one worker task
#[derive(Debug)]
struct Worker {
    throttler: Arc<Throttler>,
    group: ThrottleGroup,
    config: GroupConfig,
    offset: usize,
    deadline: Instant,
}

impl Worker {
    /// Fetch from the group's targets in turn until the deadline passes.
    /// Returns the number of completed fetches.
    async fn run(self) -> Result<u64, ThrottleError> {
        let mut fetches = 0;
        let targets = &self.config.targets;

        for target in targets.iter().cycle().skip(self.offset) {
            if Instant::now() >= self.deadline {
                break;
            }
            if self.fetch(target).await?.is_none() {
                break;
            }
            fetches += 1;
            // An unthrottled fetch never suspends; let the other workers in
            tokio::task::yield_now().await;
        }
        Ok(fetches)
    }

    /// One fetch under a permit. `None` if the deadline passed while waiting
    /// for the permit.
    async fn fetch(&self, target: &BinName) -> Result<Option<()>, ThrottleError> {
        let bins: BinSet = [target.clone()].into_iter().collect();
        let spec = &self.config.spec;

        let obtain =
            self.throttler
                .obtain_connection_permission(&self.group, spec, &bins, Instant::now());
        let Ok(permit) = timeout_at(self.deadline, obtain).await else {
            return Ok(None);
        };
        let permit = permit?;

        let result = async {
            permit.obtain_fetch_permission().await?;
            permit
                .throttle(self.config.transfer_size, Instant::now())
                .await
        }
        .await;
        // Give the permit back even if pacing failed
        self.throttler
            .release_connection_permission(&self.group, spec, &bins, Instant::now())?;
        result.map(|_| Some(()))
    }
}

/// Run the simulation to completion
pub(crate) async fn run(simulation: Simulation) -> Result<Report> {
    let coordinator = MemoryCoordinator::new();
    let started = Instant::now();
    let deadline = started + simulation.duration;
    info!(
        "Simulating {} peers with {} workers per group for {}",
        simulation.peers,
        simulation.workers,
        humantime::format_duration(simulation.duration)
    );

    let mut peers = Vec::with_capacity(simulation.peers);
    for _ in 0..simulation.peers {
        let throttler = Arc::new(Throttler::new(
            Arc::new(coordinator.clone()),
            simulation.throttler,
        ));
        let driver = PollDriver::spawn(Arc::clone(&throttler));
        peers.push((throttler, driver));
    }

    let mut workers = JoinSet::new();
    for (index, (throttler, _)) in peers.iter().enumerate() {
        for (group, config) in &simulation.groups {
            for offset in 0..simulation.workers {
                let worker = Worker {
                    throttler: Arc::clone(throttler),
                    group: group.clone(),
                    config: config.clone(),
                    offset,
                    deadline,
                };
                workers.spawn(async move { (index, worker.run().await) });
            }
        }
    }

    let mut reports: Vec<PeerReport> = (0..peers.len()).map(|_| PeerReport::default()).collect();
    while let Some(joined) = workers.join_next().await {
        let (index, outcome) = joined.context("Worker task panicked")?;
        match outcome {
            Ok(fetches) => reports[index].fetches += fetches,
            Err(e) => {
                warn!("Worker on peer {index} stopped: {e}");
                reports[index].failures += 1;
            }
        }
    }
    let elapsed = started.elapsed();

    for ((throttler, driver), report) in peers.into_iter().zip(&mut reports) {
        report.groups = throttler.stats();
        driver.shutdown().await;
        throttler.destroy(Instant::now()).await;
    }
    debug!("Simulation finished after {elapsed:?}");

    Ok(Report {
        elapsed,
        peers: reports,
    })
}
