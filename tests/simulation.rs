//! End-to-end runs: dispatcher, incident feeds and drones together.

use std::fs;
use std::time::Duration;

use firefleet::config::SimConfig;
use firefleet::drone::ExitReason;
use firefleet::error::{RpcError, SimError, TransportError};
use firefleet::sim::{self, SimulationSummary};
use firefleet::protocol::MAX_DATAGRAM;
use firefleet::types::{FaultKind, FireEvent, litres_for_severity};
use firefleet::zones::{Zone, ZoneRegistry};

fn fast_config(drones: u32) -> SimConfig {
    SimConfig::default()
        .with_drones(drones)
        .with_tick(Duration::ZERO)
        .with_producer_pacing(Duration::ZERO)
        .with_reply_timeout(Duration::from_millis(150))
}

fn assert_conserved(summary: &SimulationSummary, events: &[FireEvent]) {
    let totals = summary.litres_by_event();
    let needed: i32 = events.iter().map(|event| litres_for_severity(&event.severity)).sum();
    let dispensed: i32 = totals.values().sum();
    assert_eq!(dispensed, needed, "every litre needed is dispensed exactly once");
    assert!(totals.values().all(|litres| *litres >= 0));
}

#[test]
fn demo_scenario_terminates_with_every_fire_out() {
    let (zones, events) = sim::demo_scenario();
    let summary = sim::run_simulation(zones, events.clone(), &fast_config(3)).expect("run");

    assert!(summary.stats.finished);
    assert_eq!(summary.stats.submitted, events.len() as u64);
    assert_eq!(summary.stats.completed, summary.stats.submitted);
    assert_eq!(summary.stats.pending, 0);
    assert_eq!(summary.stats.in_flight, 0);
    assert_conserved(&summary, &events);

    for kind in FaultKind::ALL {
        assert_eq!(summary.fault_count(kind), 1, "{kind} tallied once");
    }
    assert_eq!(summary.stats.disabled_drones.len(), 1);
    let faulted: Vec<_> = summary
        .reports
        .iter()
        .filter(|report| report.exit == ExitReason::Faulted(FaultKind::Nozzle))
        .collect();
    assert_eq!(faulted.len(), 1);
    assert!(summary.stats.disabled_drones.contains(&faulted[0].drone));
}

#[test]
fn single_drone_handles_a_heavy_backlog() {
    let zones: ZoneRegistry = [
        Zone::new(1, 0.0, 0.0, 100.0, 100.0),
        Zone::new(2, 100.0, 0.0, 300.0, 100.0),
        Zone::new(3, 0.0, 100.0, 100.0, 500.0),
    ]
    .into_iter()
    .collect();
    let severities = ["low", "moderate", "high", "unknown"];
    let events: Vec<FireEvent> = (0..12)
        .map(|n| {
            let severity = severities[n as usize % 4];
            FireEvent::new(format!("09:{n:02}:00"), n % 3 + 1, "FIRE_DETECTED", severity, FaultKind::None)
        })
        .collect();

    let summary = sim::run_simulation(zones, events.clone(), &fast_config(1)).expect("run");
    assert!(summary.stats.finished);
    assert_eq!(summary.stats.completed, 12);
    assert_conserved(&summary, &events);
    let report = &summary.reports[0];
    assert_eq!(report.exit, ExitReason::Stopped);
    assert!(report.sorties >= 1);
}

#[test]
fn lone_drone_with_a_stuck_nozzle_leaves_work_behind() {
    let zones: ZoneRegistry = [Zone::new(1, 0.0, 0.0, 100.0, 100.0)].into_iter().collect();
    let events = vec![FireEvent::new("10:00:00", 1, "FIRE_DETECTED", "low", FaultKind::Nozzle)];
    let summary = sim::run_simulation(zones, events, &fast_config(1)).expect("run");

    assert!(!summary.stats.finished);
    assert_eq!(summary.stats.pending, 1);
    assert_eq!(summary.fault_count(FaultKind::Nozzle), 1);
    assert_eq!(summary.reports[0].exit, ExitReason::Faulted(FaultKind::Nozzle));
}

#[test]
fn empty_feeds_still_terminate() {
    let zones: ZoneRegistry = [Zone::new(1, 0.0, 0.0, 10.0, 10.0), Zone::new(2, 10.0, 0.0, 20.0, 10.0)]
        .into_iter()
        .collect();
    let summary = sim::run_simulation(zones, Vec::new(), &fast_config(2)).expect("run");
    assert!(summary.stats.finished);
    assert_eq!(summary.producers, 2);
    assert_eq!(summary.stats.submitted, 0);
    assert!(summary.reports.iter().all(|report| report.sorties == 0));
}

#[test]
fn runs_from_scenario_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let zone_path = dir.path().join("zones.csv");
    let event_path = dir.path().join("events.csv");
    fs::write(
        &zone_path,
        "Zone ID,Zone Start,Zone End\n1,(0;0),(200;200)\nnot a zone\n2,(200;0),(400;200)\n",
    )
    .expect("write zones");
    fs::write(
        &event_path,
        "Time,Zone ID,Event type,Severity,Fault\n\
         14:03:15,1,FIRE_DETECTED,High,NONE\n\
         14:10:00,2,DRONE_REQUEST,Moderate,PACKET_LOSS\n\
         garbage row\n\
         14:15:00,1,FIRE_DETECTED,Low,ARRIVAL\n",
    )
    .expect("write events");

    let summary = sim::run_from_files(&zone_path, &event_path, &fast_config(2)).expect("run");
    assert!(summary.stats.finished);
    assert_eq!(summary.stats.submitted, 3);
    assert_eq!(summary.fault_count(FaultKind::PacketLoss), 1);
    assert_eq!(summary.fault_count(FaultKind::Arrival), 1);
    assert_eq!(summary.litres_by_event().values().sum::<i32>(), 30 + 20 + 10);
}

#[test]
fn undeliverable_incident_does_not_stall_the_run() {
    let zones: ZoneRegistry = [Zone::new(1, 0.0, 0.0, 100.0, 100.0)].into_iter().collect();
    let events = vec![
        FireEvent::new("10:00:00", 1, "X".repeat(MAX_DATAGRAM + 1), "low", FaultKind::None),
        FireEvent::new("10:00:05", 1, "FIRE_DETECTED", "moderate", FaultKind::None),
    ];
    let summary = sim::run_simulation(zones, events, &fast_config(1)).expect("run");
    assert!(summary.stats.finished);
    assert_eq!(summary.stats.submitted, 1);
    assert_eq!(summary.stats.completed, 1);
    assert_eq!(summary.litres_by_event().values().sum::<i32>(), 20);
}

#[test]
fn failed_drone_aborts_the_run_with_its_error() {
    // One attempt per call: the reply swallowed by the packet-loss fault
    // leaves the drone with no retry.
    let zones: ZoneRegistry = [Zone::new(1, 0.0, 0.0, 100.0, 100.0)].into_iter().collect();
    let events = vec![FireEvent::new("10:00:00", 1, "FIRE_DETECTED", "low", FaultKind::PacketLoss)];
    let config = fast_config(1)
        .with_reply_timeout(Duration::from_millis(300))
        .with_max_attempts(1);

    match sim::run_simulation(zones, events, &config) {
        Err(SimError::WorkerFailed { name, source }) => {
            assert_eq!(name, "drone-1");
            assert!(matches!(
                source,
                RpcError::Transport(TransportError::Exhausted {
                    method: "HANDLE_DRONE_FAULT",
                    attempts: 1
                })
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
}
