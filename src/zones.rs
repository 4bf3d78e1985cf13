//! Zone geometry and the zone description loader.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::types::{Point, ZoneId};

/// Immutable axis-aligned rectangle of the operating area.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Zone {
    pub fn new(id: ZoneId, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { id, x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Zone lookup by id, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct ZoneRegistry {
    zones: BTreeMap<ZoneId, Zone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a zone; a later zone with the same id replaces the earlier one.
    pub fn insert(&mut self, zone: Zone) -> Option<Zone> {
        self.zones.insert(zone.id, zone)
    }

    pub fn center_of(&self, id: ZoneId) -> Option<Point> {
        self.zones.get(&id).map(Zone::center)
    }

    pub fn ids(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.zones.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl FromIterator<Zone> for ZoneRegistry {
    fn from_iter<I: IntoIterator<Item = Zone>>(iter: I) -> Self {
        let mut registry = ZoneRegistry::new();
        for zone in iter {
            registry.insert(zone);
        }
        registry
    }
}

/// Parse `(x;y)` into a point.
fn parse_coordinates(token: &str) -> Option<Point> {
    let cleaned: String = token.chars().filter(|c| *c != '(' && *c != ')').collect();
    let mut parts = cleaned.split(';');
    let x = parts.next()?.trim().parse::<f64>().ok()?;
    let y = parts.next()?.trim().parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Point::new(x, y))
}

fn parse_zone_line(line: &str) -> Option<Zone> {
    let tokens: Vec<&str> = line.split(',').collect();
    if tokens.len() != 3 {
        return None;
    }
    let id = tokens[0].trim().parse::<ZoneId>().ok()?;
    let start = parse_coordinates(tokens[1].trim())?;
    let end = parse_coordinates(tokens[2].trim())?;
    Some(Zone::new(id, start.x, start.y, end.x, end.y))
}

/// Parse zone CSV text; the first line is a header, malformed rows are skipped.
pub fn parse_zone_csv(text: &str) -> ZoneRegistry {
    let mut registry = ZoneRegistry::new();
    for (index, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_zone_line(line) {
            Some(zone) => {
                debug!(zone = zone.id, center = %zone.center(), "loaded zone");
                if registry.insert(zone).is_some() {
                    warn!(zone = zone.id, line = index + 1, "duplicate zone id, keeping the later row");
                }
            }
            None => warn!(line = index + 1, row = line, "skipping malformed zone row"),
        }
    }
    registry
}

/// Load the zone description file.
pub fn load_zone_file(path: &Path) -> Result<ZoneRegistry, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_zone_csv(&text))
}
