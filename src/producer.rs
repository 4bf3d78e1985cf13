//! Incident feeds: CSV parsing and the per-zone producer task.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::client::DispatcherClient;
use crate::error::{LoadError, RpcError};
use crate::types::{FaultKind, FireEvent, MAX_FIELD_LEN, ProducerId, ZoneId};

/// Parse one `time,zoneId,eventType,severity[,faultTag]` row.
pub fn parse_incident_line(line: &str) -> Option<FireEvent> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if !(4..=5).contains(&fields.len()) {
        return None;
    }
    let zone_id = fields[1].parse::<ZoneId>().ok()?;
    if fields[0].is_empty() || fields[2].is_empty() || fields.iter().any(|field| field.len() > MAX_FIELD_LEN) {
        return None;
    }
    let fault = match fields.get(4) {
        Some(tag) => tag.parse::<FaultKind>().unwrap_or_else(|err| {
            warn!(row = line, error = %err, "treating unknown fault tag as NONE");
            FaultKind::None
        }),
        None => FaultKind::None,
    };
    Some(FireEvent::new(fields[0], zone_id, fields[2], fields[3], fault))
}

/// Parse incident CSV text; the first line is a header, malformed rows are skipped.
pub fn parse_incident_csv(text: &str) -> Vec<FireEvent> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_incident_line(line) {
            Some(event) => events.push(event),
            None => warn!(line = index + 1, row = line, "skipping malformed incident row"),
        }
    }
    events
}

pub fn load_incident_file(path: &Path) -> Result<Vec<FireEvent>, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_incident_csv(&text))
}

/// Split a feed into one feed per zone, keeping file order within each zone.
pub fn partition_by_zone(events: Vec<FireEvent>) -> BTreeMap<ZoneId, Vec<FireEvent>> {
    let mut feeds: BTreeMap<ZoneId, Vec<FireEvent>> = BTreeMap::new();
    for event in events {
        feeds.entry(event.zone_id).or_default().push(event);
    }
    feeds
}

/// Submits one zone's incidents to the dispatcher, then reports the feed done.
pub struct IncidentProducer {
    id: ProducerId,
    events: Vec<FireEvent>,
    client: DispatcherClient,
    pacing: Duration,
}

impl IncidentProducer {
    pub fn new(id: ProducerId, events: Vec<FireEvent>, client: DispatcherClient, pacing: Duration) -> Self {
        Self {
            id,
            events,
            client,
            pacing,
        }
    }

    /// Returns how many events the dispatcher accepted.
    pub fn run(mut self) -> Result<usize, RpcError> {
        let events = std::mem::take(&mut self.events);
        info!(producer = self.id, events = events.len(), "incident feed starting");
        let mut accepted = 0;
        for (index, event) in events.into_iter().enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                thread::sleep(self.pacing);
            }
            let label = event.to_string();
            match self.client.add_fire_event(event) {
                Ok(()) => {
                    debug!(producer = self.id, event = %label, "submitted");
                    accepted += 1;
                }
                Err(RpcError::Remote(err)) => {
                    warn!(producer = self.id, event = %label, error = %err, "dispatcher refused incident");
                }
                Err(err) => {
                    error!(producer = self.id, event = %label, error = %err, "incident not delivered");
                }
            }
        }
        // Always sent, even after failed submissions, so termination can be proven.
        self.client.set_events_loaded(self.id)?;
        info!(producer = self.id, accepted, "incident feed exhausted");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_and_without_fault_tags() {
        let text = "Time,Zone ID,Event type,Severity,Fault\n\
                    14:03:15,3,FIRE_DETECTED,High,NONE\n\
                    14:10:00,7,DRONE_REQUEST,moderate,NOZZLE\n\
                    14:12:00,2,FIRE_DETECTED,low\n";
        let events = parse_incident_csv(text);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].zone_id, 3);
        assert_eq!(events[0].severity, "High");
        assert_eq!(events[1].fault, FaultKind::Nozzle);
        assert_eq!(events[2].fault, FaultKind::None);
        assert!(events.iter().all(|event| event.id.is_none()));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let text = "header\n\
                    not,enough\n\
                    14:00,x,FIRE_DETECTED,low\n\
                    14:00,1,FIRE_DETECTED,low,NONE,extra\n\
                    14:01,1,FIRE_DETECTED,low\n";
        let events = parse_incident_csv(text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, "14:01");
    }

    #[test]
    fn overlong_fields_are_skipped() {
        let bloated = format!("h\n14:00,1,{},low\n14:01,1,FIRE_DETECTED,low\n", "F".repeat(MAX_FIELD_LEN + 1));
        let events = parse_incident_csv(&bloated);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, "14:01");
    }

    #[test]
    fn unknown_fault_tag_becomes_none() {
        let event = parse_incident_line("14:00,1,FIRE_DETECTED,low,GREMLINS").expect("row");
        assert_eq!(event.fault, FaultKind::None);
    }

    #[test]
    fn feed_reports_in_after_an_undeliverable_event() {
        use crate::protocol::{Caller, MAX_DATAGRAM};
        use crate::rpc::RetryPolicy;
        use crate::scheduler::{Scheduler, SchedulerSettings};
        use crate::server::{self, ServerConfig};
        use crate::zones::{Zone, ZoneRegistry};

        let zones: ZoneRegistry = [Zone::new(1, 0.0, 0.0, 10.0, 10.0)].into_iter().collect();
        let mut scheduler = Scheduler::new(zones, SchedulerSettings::default());
        scheduler.expect_producer(1);
        let handle = server::spawn(scheduler, ServerConfig::default()).expect("server");
        let policy = RetryPolicy {
            timeout: Duration::from_millis(100),
            max_attempts: 3,
        };
        let client = DispatcherClient::connect(Caller::Producer(1), handle.producer_addr(), policy).expect("client");
        let events = vec![
            FireEvent::new("14:00", 1, "X".repeat(MAX_DATAGRAM), "low", FaultKind::None),
            FireEvent::new("14:01", 1, "FIRE_DETECTED", "low", FaultKind::None),
        ];
        let accepted = IncidentProducer::new(1, events, client, Duration::ZERO).run().expect("run");
        assert_eq!(accepted, 1);

        let stats = handle.shutdown().expect("shutdown").stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.pending, 1);
        assert!(!stats.finished);
    }

    #[test]
    fn partition_keeps_order_per_zone() {
        let events = parse_incident_csv("h\n1:00,2,F,low\n2:00,1,F,low\n3:00,2,F,high\n");
        let feeds = partition_by_zone(events);
        assert_eq!(feeds.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        let zone_two: Vec<&str> = feeds[&2].iter().map(|event| event.time.as_str()).collect();
        assert_eq!(zone_two, vec!["1:00", "3:00"]);
    }
}
