//! Dispatcher state: the pending-event queue, zone registry, counters and
//! fault bookkeeping, plus the method table that serves calls against them.
//!
//! The scheduler does no I/O and has no interior locking. The dispatch loop in
//! [`crate::server`] owns it and feeds it one call at a time, which makes every
//! method body atomic with respect to every other.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::event_queue::{EventQueue, Slot};
use crate::protocol::{Caller, Method, ReplyBody, TravelPlan};
use crate::types::{
    DroneId, EventId, FaultKind, FireEvent, FireState, MAX_FIELD_LEN, Point, ProducerId, ZoneId, litres_for_severity,
};
use crate::zones::ZoneRegistry;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulerSettings {
    /// Distance units per simulated second.
    pub cruise_speed: f64,
    /// Per-axis reach around a drone's position for on-route pickups.
    pub proximity_threshold: f64,
    pub base: Point,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cruise_speed: 18.0,
            proximity_threshold: 50.0,
            base: Point::ORIGIN,
        }
    }
}

/// Answer to a plain "next event" request.
#[derive(Clone, Debug, PartialEq)]
pub enum NextEvent {
    Assigned(FireEvent),
    Wait,
    Stop,
}

/// Snapshot of dispatcher counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub completed: u64,
    pub pending: usize,
    pub in_flight: usize,
    pub faults: BTreeMap<FaultKind, u64>,
    pub disabled_drones: BTreeSet<DroneId>,
    pub finished: bool,
}

pub struct Scheduler {
    settings: SchedulerSettings,
    zones: ZoneRegistry,
    queue: EventQueue,
    /// Handed-out events and the queue slot each was taken from.
    checked_out: HashMap<EventId, Slot>,
    next_id: EventId,
    submitted: u64,
    completed: u64,
    /// Known producers and whether each has finished its feed.
    producers: BTreeMap<ProducerId, bool>,
    faults: BTreeMap<FaultKind, u64>,
    disabled_drones: BTreeSet<DroneId>,
    finished: bool,
}

impl Scheduler {
    pub fn new(zones: ZoneRegistry, settings: SchedulerSettings) -> Self {
        Self {
            settings,
            zones,
            queue: EventQueue::new(),
            checked_out: HashMap::new(),
            next_id: 1,
            submitted: 0,
            completed: 0,
            producers: BTreeMap::new(),
            faults: BTreeMap::new(),
            disabled_drones: BTreeSet::new(),
            finished: false,
        }
    }

    /// Register a feed that must report exhaustion before the run can finish.
    pub fn expect_producer(&mut self, producer: ProducerId) {
        self.producers.entry(producer).or_insert(false);
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn fault_count(&self, kind: FaultKind) -> u64 {
        self.faults.get(&kind).copied().unwrap_or(0)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted,
            completed: self.completed,
            pending: self.queue.len(),
            in_flight: self.checked_out.len(),
            faults: self.faults.clone(),
            disabled_drones: self.disabled_drones.clone(),
            finished: self.finished,
        }
    }

    fn center_of(&self, zone: ZoneId) -> Result<Point, RemoteError> {
        self.zones.center_of(zone).ok_or(RemoteError::UnknownZone(zone))
    }

    fn check_in(&mut self, event: &FireEvent) -> Result<(EventId, Slot), RemoteError> {
        let id = event.id.ok_or_else(|| RemoteError::MalformedArguments {
            method: "check-in".to_string(),
            reason: "event has no id".to_string(),
        })?;
        let slot = self.checked_out.remove(&id).ok_or(RemoteError::NotCheckedOut(id))?;
        debug_assert!(!self.queue.contains(id), "checked-out event #{id} is also queued");
        Ok((id, slot))
    }

    fn check_out(&mut self, taken: Option<(Slot, FireEvent)>) -> Option<FireEvent> {
        let (slot, event) = taken?;
        if let Some(id) = event.id {
            self.checked_out.insert(id, slot);
        }
        Some(event)
    }

    fn refresh_finished(&mut self) {
        if self.finished {
            return;
        }
        let feeds_done = self.producers.values().all(|loaded| *loaded);
        if self.queue.is_empty() && feeds_done && self.completed == self.submitted {
            info!(
                submitted = self.submitted,
                completed = self.completed,
                "all fire events handled, dispatcher finished"
            );
            self.finished = true;
        }
    }

    /// Admit a fresh event, or requeue a checked-out one at the tail.
    pub fn add_fire_event(&mut self, mut event: FireEvent) -> Result<EventId, RemoteError> {
        self.center_of(event.zone_id)?;
        if event.has_oversized_field() {
            return Err(RemoteError::MalformedArguments {
                method: "ADD_FIRE_EVENT".to_string(),
                reason: format!("text field longer than {MAX_FIELD_LEN} bytes"),
            });
        }
        if event.id.is_some() {
            let (id, _) = self.check_in(&event)?;
            debug!(event = %event.label(), "requeued at tail");
            self.queue.push_back(event);
            return Ok(id);
        }
        let id = self.next_id;
        self.next_id += 1;
        event.id = Some(id);
        event.litres_needed = litres_for_severity(&event.severity);
        event.state = FireState::Active;
        info!(target: "telemetry", event = %event, "fire event added");
        self.queue.push_back(event);
        self.submitted += 1;
        Ok(id)
    }

    pub fn next_fire_event(&mut self) -> NextEvent {
        let head = self.queue.pop_front();
        if let Some(event) = self.check_out(head) {
            info!(target: "telemetry", event = %event.label(), "dispatching next event");
            return NextEvent::Assigned(event);
        }
        self.refresh_finished();
        if self.finished { NextEvent::Stop } else { NextEvent::Wait }
    }

    /// Proximity-first selection around the drone's current position.
    pub fn next_assigned_event(&mut self, drone: DroneId, position: Point) -> Option<FireEvent> {
        let zones = &self.zones;
        let event = self.queue.pop_by_proximity(position, self.settings.proximity_threshold, |event| {
            zones.center_of(event.zone_id)
        });
        if let Some((_, event)) = event.as_ref() {
            debug!(drone, at = %position, event = %event.label(), "on-route candidate");
        }
        self.check_out(event)
    }

    /// First queued event reachable and returnable within `battery` seconds.
    pub fn additional_fire_event(&mut self, battery: f64, position: Point) -> Option<FireEvent> {
        let zones = &self.zones;
        let settings = self.settings;
        let event = self.queue.pop_by_feasibility(|event| match zones.center_of(event.zone_id) {
            Some(center) => {
                let to_fire = position.distance_to(center) / settings.cruise_speed;
                let to_base = center.distance_to(settings.base) / settings.cruise_speed;
                to_fire + to_base < battery
            }
            None => false,
        });
        if let Some((_, event)) = event.as_ref() {
            debug!(battery, at = %position, event = %event.label(), "additional event fits battery");
        }
        self.check_out(event)
    }

    pub fn update_status(&mut self, mut event: FireEvent, dispensed: i32) -> Result<(), RemoteError> {
        self.check_in(&event)?;
        let remaining = event.remove_litres(dispensed);
        if !event.is_satisfied() {
            info!(event = %event.label(), dispensed, remaining, "fire still burning, requeued at front");
            self.queue.push_front(event);
        } else {
            event.state = FireState::Inactive;
            self.completed += 1;
            info!(target: "telemetry", event = %event.label(), dispensed, "fire extinguished");
            self.refresh_finished();
        }
        Ok(())
    }

    pub fn handle_drone_fault(
        &mut self,
        mut event: FireEvent,
        fault: FaultKind,
        drone: DroneId,
    ) -> Result<(), RemoteError> {
        self.check_in(&event)?;
        *self.faults.entry(fault).or_insert(0) += 1;
        if !fault.is_recoverable() {
            self.disabled_drones.insert(drone);
        }
        warn!(target: "telemetry", drone, %fault, event = %event.label(), "drone fault, event requeued at front");
        event.fault = FaultKind::None;
        self.queue.push_front(event);
        Ok(())
    }

    pub fn set_events_loaded(&mut self, producer: ProducerId) {
        info!(producer, "incident feed exhausted");
        self.producers.insert(producer, true);
        self.refresh_finished();
    }

    /// Give a checked-out event back untouched, at the queue position it was
    /// taken from.
    pub fn release_event(&mut self, event: FireEvent) -> Result<(), RemoteError> {
        let (_, slot) = self.check_in(&event)?;
        debug!(event = %event.label(), "released back to its queue position");
        self.queue.restore(slot, event);
        Ok(())
    }

    pub fn travel_plan(&self, from: Point, zone: ZoneId) -> Result<TravelPlan, RemoteError> {
        let destination = self.center_of(zone)?;
        Ok(TravelPlan {
            destination,
            seconds: from.distance_to(destination) / self.settings.cruise_speed,
        })
    }

    /// Execute one call from `caller`.
    pub fn handle(&mut self, caller: Caller, call: Method) -> ReplyBody {
        if !call.permitted_for(caller) {
            return ReplyBody::Error(RemoteError::NotPermitted {
                method: call.name().to_string(),
                caller: caller.to_string(),
            });
        }
        let drone = match caller {
            Caller::Drone(id) => id,
            Caller::Producer(_) => 0,
        };
        let result = match call {
            Method::AddFireEvent(event) => self.add_fire_event(event).map(|_| ReplyBody::Ack),
            Method::GetNextFireEvent => Ok(match self.next_fire_event() {
                NextEvent::Assigned(event) => ReplyBody::Event(Some(event)),
                NextEvent::Wait => ReplyBody::Wait,
                NextEvent::Stop => ReplyBody::Stop,
            }),
            Method::GetNextAssignedEvent { x, y } => {
                Ok(ReplyBody::Event(self.next_assigned_event(drone, Point::new(x, y))))
            }
            Method::GetAdditionalFireEvent { battery, x, y } => {
                Ok(ReplyBody::Event(self.additional_fire_event(battery, Point::new(x, y))))
            }
            Method::UpdateStatus { event, dispensed } => self.update_status(event, dispensed).map(|_| ReplyBody::Ack),
            Method::HandleDroneFault { event, fault } => {
                self.handle_drone_fault(event, fault, drone).map(|_| ReplyBody::Ack)
            }
            Method::SetEventsLoaded(producer) => {
                self.set_events_loaded(producer);
                Ok(ReplyBody::Ack)
            }
            Method::CalculateTravelTime { x, y, zone_id } => {
                self.travel_plan(Point::new(x, y), zone_id).map(ReplyBody::Travel)
            }
            Method::ReleaseEvent(event) => self.release_event(event).map(|_| ReplyBody::Ack),
        };
        result.unwrap_or_else(|err| {
            warn!(%caller, error = %err, "call rejected");
            ReplyBody::Error(err)
        })
    }
}
