//! Drone worker: pulls fire events from the dispatcher and flies them.
//!
//! The worker owns only its own position, tank and battery; every decision
//! about which event to fight next is made by the dispatcher. Travel is
//! simulated one second at a time so the drone can pick up a closer fire on
//! the way. Injected faults are consumed at the point where the drone would
//! otherwise carry on normally.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::DispatcherClient;
use crate::config::DroneSpec;
use crate::error::{RpcError, TransportError};
use crate::protocol::{Caller, TravelPlan};
use crate::rpc::RetryPolicy;
use crate::scheduler::NextEvent;
use crate::types::{DroneId, DroneState, EventId, FaultKind, FireEvent, Point};
use crate::watchdog::TravelWatchdog;

/// Why a drone's worker loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The dispatcher said no more work will arrive.
    Stopped,
    /// A fatal fault took the drone out of service.
    Faulted(FaultKind),
}

/// What one drone did during a run.
#[derive(Clone, Debug, PartialEq)]
pub struct DroneReport {
    pub drone: DroneId,
    /// Agent reported per visit, in visit order.
    pub dispensed: Vec<(EventId, i32)>,
    pub sorties: u32,
    pub diversions: u32,
    pub faults: Vec<(Option<EventId>, FaultKind)>,
    pub distance: f64,
    pub exit: ExitReason,
}

impl DroneReport {
    fn new(drone: DroneId) -> Self {
        Self {
            drone,
            dispensed: Vec::new(),
            sorties: 0,
            diversions: 0,
            faults: Vec::new(),
            distance: 0.0,
            exit: ExitReason::Stopped,
        }
    }

    pub fn visits(&self) -> usize {
        self.dispensed.len()
    }

    pub fn litres_dispensed(&self) -> i32 {
        self.dispensed.iter().map(|(_, litres)| litres).sum()
    }
}

/// Result of flying towards an event.
enum Leg {
    Arrived(FireEvent),
    /// ARRIVAL fault: the watchdog fired and the event was handed back.
    Stalled,
}

/// Result of fighting one chain of events.
enum Sortie {
    Continue,
    Shutdown(FaultKind),
}

pub struct Drone {
    id: DroneId,
    spec: DroneSpec,
    client: DispatcherClient,
    state: DroneState,
    position: Point,
    airborne: bool,
    agent: i32,
    battery: f64,
    report: DroneReport,
}

impl Drone {
    pub fn new(id: DroneId, spec: DroneSpec, client: DispatcherClient) -> Self {
        Self {
            id,
            client,
            state: DroneState::Idle,
            position: spec.base,
            airborne: false,
            agent: spec.capacity,
            battery: spec.battery,
            report: DroneReport::new(id),
            spec,
        }
    }

    /// Bind a client for drone `id` against the dispatcher's drone listener.
    pub fn connect(
        id: DroneId,
        spec: DroneSpec,
        server: SocketAddr,
        policy: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let client = DispatcherClient::connect(Caller::Drone(id), server, policy)?;
        Ok(Self::new(id, spec, client))
    }

    /// Work until the dispatcher says stop or a fatal fault occurs.
    pub fn run(mut self) -> Result<DroneReport, RpcError> {
        info!(target: "telemetry", drone = self.id, at = %self.position, "drone online");
        loop {
            match self.client.next_fire_event()? {
                NextEvent::Assigned(event) => {
                    if let Sortie::Shutdown(fault) = self.sortie(event)? {
                        self.report.exit = ExitReason::Faulted(fault);
                        break;
                    }
                }
                NextEvent::Wait => {
                    if self.airborne {
                        self.return_to_base();
                    }
                    std::thread::sleep(self.spec.wait_poll);
                }
                NextEvent::Stop => {
                    self.return_to_base();
                    break;
                }
            }
        }
        info!(
            target: "telemetry",
            drone = self.id,
            exit = ?self.report.exit,
            visits = self.report.visits(),
            litres = self.report.litres_dispensed(),
            "drone offline"
        );
        Ok(self.report)
    }

    fn set_state(&mut self, state: DroneState, event: Option<&FireEvent>) {
        if self.state != state {
            info!(
                target: "telemetry",
                drone = self.id,
                from = %self.state,
                to = %state,
                at = %self.position,
                event = ?event.map(FireEvent::label),
                battery = self.battery,
                agent = self.agent,
                "drone state change"
            );
        }
        self.state = state;
    }

    /// Spend simulated flight time.
    fn spend(&mut self, secs: f64) {
        self.spec.pause(secs);
        self.battery -= secs;
    }

    fn move_to(&mut self, to: Point) {
        self.report.distance += self.position.distance_to(to);
        self.position = to;
    }

    fn take_off(&mut self) {
        self.spend(self.spec.takeoff_secs);
        self.airborne = true;
        self.report.sorties += 1;
        debug!(drone = self.id, sortie = self.report.sorties, "took off");
    }

    fn return_to_base(&mut self) {
        if !self.airborne {
            return;
        }
        self.set_state(DroneState::Returning, None);
        let base = self.spec.base;
        let secs = self.position.distance_to(base) / self.spec.cruise_speed;
        self.spend(secs);
        self.move_to(base);
        self.spend(self.spec.landing_secs);
        self.airborne = false;
        self.agent = self.spec.capacity;
        self.battery = self.spec.battery;
        self.set_state(DroneState::Idle, None);
    }

    /// Seconds needed to fly from `destination` back to base.
    fn time_home_from(&self, destination: Point) -> f64 {
        destination.distance_to(self.spec.base) / self.spec.cruise_speed
    }

    /// Fight `first` and any follow-up events until the drone heads home.
    fn sortie(&mut self, first: FireEvent) -> Result<Sortie, RpcError> {
        let mut job = first;
        loop {
            if self.airborne {
                let plan = self.client.travel_plan(self.position, &job)?;
                if plan.seconds + self.time_home_from(plan.destination) >= self.battery {
                    debug!(
                        drone = self.id,
                        event = %job.label(),
                        battery = self.battery,
                        "recharging before next event"
                    );
                    self.return_to_base();
                }
            }
            if !self.airborne {
                self.take_off();
            }

            job = match self.fly_to(job)? {
                Leg::Arrived(job) => job,
                Leg::Stalled => {
                    self.return_to_base();
                    return Ok(Sortie::Continue);
                }
            };

            self.set_state(DroneState::DroppingAgent, Some(&job));
            match job.take_fault() {
                FaultKind::PacketLoss => {
                    self.client.drop_next_reply();
                    self.report_fault(job, FaultKind::PacketLoss)?;
                    // Abandon the event in place; the next request comes from here.
                    return Ok(Sortie::Continue);
                }
                FaultKind::Nozzle => {
                    self.report_fault(job, FaultKind::Nozzle)?;
                    warn!(
                        target: "telemetry",
                        drone = self.id,
                        at = %self.position,
                        "nozzle stuck, drone shutting down"
                    );
                    return Ok(Sortie::Shutdown(FaultKind::Nozzle));
                }
                FaultKind::Arrival | FaultKind::None => {}
            }

            let amount = self.dispense(&job);
            if let Some(id) = job.id {
                self.report.dispensed.push((id, amount));
            }
            self.client.update_status(job, amount)?;

            if self.agent <= 0 {
                self.return_to_base();
                return Ok(Sortie::Continue);
            }
            match self.client.additional_fire_event(self.battery, self.position)? {
                Some(next) => {
                    debug!(drone = self.id, event = %next.label(), agent = self.agent, "continuing to next event");
                    job = next;
                }
                None => {
                    self.return_to_base();
                    return Ok(Sortie::Continue);
                }
            }
        }
    }

    fn dispense(&mut self, job: &FireEvent) -> i32 {
        let amount = job.litres_needed.min(self.agent).max(0);
        self.spend(self.spec.nozzle_secs);
        self.spend(f64::from(amount) / self.spec.flow_rate);
        self.spend(self.spec.nozzle_secs);
        self.agent -= amount;
        info!(
            target: "telemetry",
            drone = self.id,
            event = %job.label(),
            litres = amount,
            agent_left = self.agent,
            "agent dropped"
        );
        amount
    }

    fn report_fault(&mut self, job: FireEvent, fault: FaultKind) -> Result<(), RpcError> {
        warn!(target: "telemetry", drone = self.id, event = %job.label(), %fault, "reporting fault");
        self.report.faults.push((job.id, fault));
        self.client.report_fault(job, fault)
    }

    /// Fly towards `job`, checking once per simulated second for a closer fire.
    fn fly_to(&mut self, mut job: FireEvent) -> Result<Leg, RpcError> {
        'leg: loop {
            let plan = self.client.travel_plan(self.position, &job)?;
            self.set_state(DroneState::OnRoute, Some(&job));
            if job.fault == FaultKind::Arrival {
                job.take_fault();
                self.stall(job, &plan)?;
                return Ok(Leg::Stalled);
            }

            let origin = self.position;
            let steps = plan.seconds.ceil().max(0.0) as u64;
            for step in 1..=steps {
                self.spend(1.0);
                self.move_to(origin.lerp(plan.destination, step as f64 / plan.seconds));
                if step == steps {
                    break;
                }
                let Some(candidate) = self.client.next_assigned_event(self.position)? else {
                    continue;
                };
                let remaining = plan.seconds - step as f64;
                let detour = self.client.travel_plan(self.position, &candidate)?;
                if detour.seconds < remaining {
                    info!(
                        target: "telemetry",
                        drone = self.id,
                        at = %self.position,
                        from = %job.label(),
                        to = %candidate.label(),
                        "diverting to closer fire"
                    );
                    self.report.diversions += 1;
                    self.client.add_fire_event(job)?;
                    job = candidate;
                    continue 'leg;
                }
                self.client.release_event(candidate)?;
            }
            self.move_to(plan.destination);
            debug!(drone = self.id, event = %job.label(), at = %self.position, "arrived");
            return Ok(Leg::Arrived(job));
        }
    }

    /// Hover without progress until the travel watchdog gives up on us.
    fn stall(&mut self, job: FireEvent, plan: &TravelPlan) -> Result<(), RpcError> {
        warn!(target: "telemetry", drone = self.id, event = %job.label(), "drone stalled en route");
        let deadline = self.spec.real_time(plan.seconds * self.spec.watchdog_factor);
        let watchdog = TravelWatchdog::arm(self.id, job.id, deadline);
        let step = self.spec.tick.max(Duration::from_millis(1));
        loop {
            if let Some(alarm) = watchdog.wait_alarm(step) {
                debug!(drone = self.id, overdue_after = ?alarm.overdue_after, "watchdog alarm received");
                break;
            }
            self.battery -= 1.0;
            if self.battery <= 0.0 {
                warn!(drone = self.id, "battery exhausted before watchdog alarm");
                break;
            }
        }
        watchdog.disarm();
        self.report_fault(job, FaultKind::Arrival)
    }
}
