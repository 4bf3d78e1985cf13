//! Shared identifiers and the fire-event job model used across the system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier the dispatcher stamps on every admitted fire event.
pub type EventId = u64;
/// Unique identifier for a drone worker.
pub type DroneId = u32;
/// Unique identifier for a physical zone.
pub type ZoneId = u32;
/// Identifier of an incident feed; each zone owns one feed.
pub type ProducerId = u32;

/// A position in the 2D operating area.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Whether `other` lies within `reach` of this point on both axes.
    pub fn within_reach(&self, other: Point, reach: f64) -> bool {
        (self.x - other.x).abs() <= reach && (self.y - other.y).abs() <= reach
    }

    /// Point at `fraction` (0..=1) of the straight line from `self` to `to`.
    pub fn lerp(&self, to: Point, fraction: f64) -> Point {
        let fraction = fraction.clamp(0.0, 1.0);
        Point {
            x: self.x + (to.x - self.x) * fraction,
            y: self.y + (to.y - self.y) * fraction,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// One-shot fault directive carried by a fire event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    #[default]
    None,
    /// Drone never reaches the zone; caught by the travel watchdog.
    Arrival,
    /// Nozzle stuck; fatal for the drone that hits it.
    Nozzle,
    /// Reply lost on the wire; the drone abandons the job.
    PacketLoss,
}

impl FaultKind {
    pub const ALL: [FaultKind; 3] = [FaultKind::Arrival, FaultKind::Nozzle, FaultKind::PacketLoss];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::None => "NONE",
            FaultKind::Arrival => "ARRIVAL",
            FaultKind::Nozzle => "NOZZLE",
            FaultKind::PacketLoss => "PACKET_LOSS",
        }
    }

    /// Whether the drone returns to service after this fault.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FaultKind::Nozzle)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(FaultKind::None),
            "ARRIVAL" => Ok(FaultKind::Arrival),
            "NOZZLE" => Ok(FaultKind::Nozzle),
            "PACKET_LOSS" => Ok(FaultKind::PacketLoss),
            other => Err(format!("unknown fault tag `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FireState {
    #[default]
    Active,
    Inactive,
}

/// Execution state of a drone worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneState {
    Idle,
    OnRoute,
    DroppingAgent,
    Returning,
}

impl fmt::Display for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DroneState::Idle => "IDLE",
            DroneState::OnRoute => "ON_ROUTE",
            DroneState::DroppingAgent => "DROPPING_AGENT",
            DroneState::Returning => "RETURNING",
        };
        f.write_str(name)
    }
}

/// Litres of agent a fresh fire of the given severity needs.
pub fn litres_for_severity(severity: &str) -> i32 {
    match severity.trim().to_ascii_lowercase().as_str() {
        "low" => 10,
        "moderate" => 20,
        "high" => 30,
        _ => 0,
    }
}

/// Unit of work handed to drones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FireEvent {
    /// `None` until the dispatcher admits the event.
    pub id: Option<EventId>,
    pub time: String,
    pub zone_id: ZoneId,
    pub event_type: String,
    pub severity: String,
    pub litres_needed: i32,
    pub fault: FaultKind,
    pub state: FireState,
}

/// Longest `time`, `event_type` or `severity` text the dispatcher admits.
/// Keeps every event, and every reply carrying one, inside one datagram.
pub const MAX_FIELD_LEN: usize = 256;

impl FireEvent {
    /// Construct a fresh, not yet admitted event.
    pub fn new(
        time: impl Into<String>,
        zone_id: ZoneId,
        event_type: impl Into<String>,
        severity: impl Into<String>,
        fault: FaultKind,
    ) -> Self {
        Self {
            id: None,
            time: time.into(),
            zone_id,
            event_type: event_type.into(),
            severity: severity.into(),
            litres_needed: 0,
            fault,
            state: FireState::Active,
        }
    }

    /// Whether any text field exceeds [`MAX_FIELD_LEN`] bytes.
    pub fn has_oversized_field(&self) -> bool {
        [&self.time, &self.event_type, &self.severity]
            .iter()
            .any(|field| field.len() > MAX_FIELD_LEN)
    }

    pub fn is_satisfied(&self) -> bool {
        self.litres_needed <= 0
    }

    /// Subtract dispensed agent; returns what is still needed.
    pub fn remove_litres(&mut self, litres: i32) -> i32 {
        self.litres_needed -= litres;
        self.litres_needed
    }

    /// Consume the fault directive, leaving `NONE` behind.
    pub fn take_fault(&mut self) -> FaultKind {
        std::mem::take(&mut self.fault)
    }

    /// Short label for logs: `#id@zone`.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("#{id}@zone{}", self.zone_id),
            None => format!("new@zone{}", self.zone_id),
        }
    }
}

impl fmt::Display for FireEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} time={} type={} severity={} litres={} fault={}",
            self.label(),
            self.time,
            self.event_type,
            self.severity,
            self.litres_needed,
            self.fault
        )
    }
}
