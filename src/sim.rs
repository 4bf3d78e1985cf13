//! Simulation runner: wires the dispatcher, incident producers and drones
//! together and reports what happened.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::client::DispatcherClient;
use crate::config::SimConfig;
use crate::drone::{Drone, DroneReport};
use crate::error::{RpcError, SimError};
use crate::producer::{self, IncidentProducer};
use crate::protocol::Caller;
use crate::scheduler::{DispatchStats, Scheduler};
use crate::server::{self, ServerConfig};
use crate::types::{EventId, FaultKind, FireEvent, ProducerId};
use crate::zones::{self, Zone, ZoneRegistry};

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data; getrusage fills it in.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Outcome of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationSummary {
    pub drones: u32,
    pub producers: usize,
    pub stats: DispatchStats,
    /// Drone reports ordered by drone id.
    pub reports: Vec<DroneReport>,
    pub elapsed_ms: f64,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
}

impl SimulationSummary {
    /// Total litres reported per event across all drones.
    pub fn litres_by_event(&self) -> BTreeMap<EventId, i32> {
        let mut totals = BTreeMap::new();
        for (event, litres) in self.reports.iter().flat_map(|report| report.dispensed.iter()) {
            *totals.entry(*event).or_insert(0) += litres;
        }
        totals
    }

    pub fn fault_count(&self, kind: FaultKind) -> u64 {
        self.stats.faults.get(&kind).copied().unwrap_or(0)
    }

    pub fn print(&self, title: &str) {
        println!("{title}");
        println!("drones={} producers={}", self.drones, self.producers);
        println!("finished={}", self.stats.finished);
        println!("submitted={}", self.stats.submitted);
        println!("completed={}", self.stats.completed);
        println!("pending={}", self.stats.pending);
        let faults: Vec<String> = FaultKind::ALL
            .iter()
            .map(|kind| format!("{kind}:{}", self.fault_count(*kind)))
            .collect();
        println!("faults={}", faults.join(","));
        println!("disabled_drones={:?}", self.stats.disabled_drones);
        for report in &self.reports {
            println!(
                "drone-{} visits={} litres={} sorties={} diversions={} distance={:.1} exit={:?}",
                report.drone,
                report.visits(),
                report.litres_dispensed(),
                report.sorties,
                report.diversions,
                report.distance,
                report.exit
            );
        }
        println!("elapsed_ms={:.1}", self.elapsed_ms);
        match (self.cpu_user_s, self.cpu_sys_s) {
            (Some(user), Some(sys)) => println!("cpu_user_s={user:.3} cpu_sys_s={sys:.3}"),
            _ => println!("cpu_user_s=n/a cpu_sys_s=n/a"),
        }
    }
}

/// `(thread name, finished cleanly)` for every worker that ends.
type Exit = (String, bool);

/// Reports a worker's end to the runner from `Drop`, so a panic counts too.
struct ExitSignal {
    name: String,
    ok: bool,
    exits: mpsc::Sender<Exit>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.exits.send((self.name.clone(), self.ok));
    }
}

fn spawn_worker<T, F>(name: String, exits: &mpsc::Sender<Exit>, work: F) -> Result<Worker<T>, SimError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RpcError> + Send + 'static,
{
    let signal = ExitSignal {
        name: name.clone(),
        ok: false,
        exits: exits.clone(),
    };
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let mut signal = signal;
            let result = work();
            signal.ok = result.is_ok();
            result
        })
        .map_err(|source| SimError::Spawn {
            name: name.clone(),
            source,
        })?;
    Ok((name, handle))
}

type Worker<T> = (String, thread::JoinHandle<Result<T, RpcError>>);

fn join<T>((name, handle): Worker<T>) -> (String, Result<T, SimError>) {
    let result = match handle.join() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => {
            error!(thread = %name, error = %source, "worker failed");
            Err(SimError::WorkerFailed {
                name: name.clone(),
                source,
            })
        }
        Err(_) => Err(SimError::ThreadPanic(name.clone())),
    };
    (name, result)
}

/// Run the dispatcher, one producer per zone feed and `config.drones` drones
/// until every drone has exited.
///
/// If any worker fails the dispatcher is halted, so the remaining workers
/// run out of retries instead of waiting on work that can no longer finish,
/// and the run reports the failure that started it.
pub fn run_simulation(
    zones: ZoneRegistry,
    events: Vec<FireEvent>,
    config: &SimConfig,
) -> Result<SimulationSummary, SimError> {
    let mut feeds = producer::partition_by_zone(events);
    // Zones without incidents still get a feed so every zone reports in.
    for zone in zones.ids() {
        feeds.entry(zone).or_default();
    }
    let producer_ids: BTreeSet<ProducerId> = feeds.keys().copied().collect();

    let mut scheduler = Scheduler::new(zones, config.scheduler);
    for id in &producer_ids {
        scheduler.expect_producer(*id);
    }
    let server = server::spawn(
        scheduler,
        ServerConfig {
            poll: config.server_poll,
            ..ServerConfig::default()
        },
    )?;
    info!(drones = config.drones, producers = producer_ids.len(), "simulation starting");

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    let (exit_tx, exit_rx) = mpsc::channel::<Exit>();

    let mut producers = Vec::new();
    for (id, events) in feeds {
        let client = DispatcherClient::connect(Caller::Producer(id), server.producer_addr(), config.retry)?;
        let feed = IncidentProducer::new(id, events, client, config.producer_pacing);
        producers.push(spawn_worker(format!("producer-{id}"), &exit_tx, move || feed.run())?);
    }

    let mut drones = Vec::new();
    for id in 1..=config.drones {
        let drone = Drone::connect(id, config.drone, server.drone_addr(), config.retry)?;
        drones.push(spawn_worker(format!("drone-{id}"), &exit_tx, move || drone.run())?);
    }
    drop(exit_tx);

    // Ends once every worker's signal has been sent.
    let mut culprit: Option<String> = None;
    for (name, ok) in exit_rx {
        if !ok && culprit.is_none() {
            warn!(thread = %name, "worker failed, halting the dispatcher");
            server.halt();
            culprit = Some(name);
        }
    }

    let producer_results: Vec<_> = producers.into_iter().map(join).collect();
    let drone_results: Vec<_> = drones.into_iter().map(join).collect();
    let scheduler = server.shutdown()?;

    let mut failures: Vec<(String, SimError)> = Vec::new();
    for (name, result) in producer_results {
        if let Err(err) = result {
            failures.push((name, err));
        }
    }
    let mut reports = Vec::new();
    for (name, result) in drone_results {
        match result {
            Ok(report) => reports.push(report),
            Err(err) => failures.push((name, err)),
        }
    }
    if !failures.is_empty() {
        let first = failures
            .iter()
            .position(|(name, _)| culprit.as_ref() == Some(name))
            .unwrap_or(0);
        return Err(failures.swap_remove(first).1);
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };
    let stats = scheduler.stats();
    info!(
        finished = stats.finished,
        submitted = stats.submitted,
        completed = stats.completed,
        elapsed_ms,
        "simulation finished"
    );

    Ok(SimulationSummary {
        drones: config.drones,
        producers: producer_ids.len(),
        stats,
        reports,
        elapsed_ms,
        cpu_user_s,
        cpu_sys_s,
    })
}

/// Built-in scenario: three zones, six fires, one of each injected fault.
pub fn demo_scenario() -> (ZoneRegistry, Vec<FireEvent>) {
    let zones = [
        Zone::new(1, 0.0, 0.0, 200.0, 200.0),
        Zone::new(2, 200.0, 0.0, 400.0, 200.0),
        Zone::new(3, 0.0, 200.0, 200.0, 400.0),
    ]
    .into_iter()
    .collect();
    let events = vec![
        FireEvent::new("14:00:00", 1, "FIRE_DETECTED", "High", FaultKind::None),
        FireEvent::new("14:00:05", 2, "FIRE_DETECTED", "Moderate", FaultKind::None),
        FireEvent::new("14:00:10", 3, "FIRE_DETECTED", "Low", FaultKind::Arrival),
        FireEvent::new("14:00:15", 1, "DRONE_REQUEST", "Low", FaultKind::Nozzle),
        FireEvent::new("14:00:20", 2, "FIRE_DETECTED", "Moderate", FaultKind::PacketLoss),
        FireEvent::new("14:00:25", 3, "DRONE_REQUEST", "High", FaultKind::None),
    ];
    (zones, events)
}

pub fn run_demo(config: &SimConfig) -> Result<SimulationSummary, SimError> {
    let (zones, events) = demo_scenario();
    run_simulation(zones, events, config)
}

/// Load a zone file and an incident file, then run them.
pub fn run_from_files(zone_path: &Path, event_path: &Path, config: &SimConfig) -> Result<SimulationSummary, SimError> {
    let zones = zones::load_zone_file(zone_path)?;
    let events = producer::load_incident_file(event_path)?;
    info!(zones = zones.len(), events = events.len(), "scenario loaded");
    run_simulation(zones, events, config)
}
