//! Simulation settings.
//!
//! Physical quantities are in simulated seconds, distance units and litres.
//! `DroneSpec::tick` maps one simulated second onto wall-clock time, so the
//! same scenario can run in real time or compressed for tests.

use std::thread;
use std::time::Duration;

use crate::rpc::RetryPolicy;
use crate::scheduler::SchedulerSettings;
use crate::types::Point;

/// Physical characteristics shared by every drone in the fleet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DroneSpec {
    /// Agent tank size in litres.
    pub capacity: i32,
    pub cruise_speed: f64,
    /// Litres dispensed per simulated second.
    pub flow_rate: f64,
    /// Flight endurance in simulated seconds.
    pub battery: f64,
    pub takeoff_secs: f64,
    pub landing_secs: f64,
    /// Time to open, and again to close, the nozzle.
    pub nozzle_secs: f64,
    /// Watchdog deadline as a multiple of the planned travel time.
    pub watchdog_factor: f64,
    pub base: Point,
    /// Wall-clock length of one simulated second.
    pub tick: Duration,
    /// Wall-clock delay before asking again after a WAIT reply.
    pub wait_poll: Duration,
}

impl Default for DroneSpec {
    fn default() -> Self {
        Self {
            capacity: 14,
            cruise_speed: 18.0,
            flow_rate: 2.0,
            battery: 1800.0,
            takeoff_secs: 10.0,
            landing_secs: 10.0,
            nozzle_secs: 1.0,
            watchdog_factor: 1.1,
            base: Point::ORIGIN,
            tick: Duration::from_secs(1),
            wait_poll: Duration::from_millis(250),
        }
    }
}

impl DroneSpec {
    /// Wall-clock duration of `sim_secs` simulated seconds.
    pub fn real_time(&self, sim_secs: f64) -> Duration {
        self.tick.mul_f64(sim_secs.max(0.0))
    }

    /// Sleep through `sim_secs` simulated seconds.
    pub fn pause(&self, sim_secs: f64) {
        let real = self.real_time(sim_secs);
        if !real.is_zero() {
            thread::sleep(real);
        }
    }
}

/// Everything needed to run one simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    pub drones: u32,
    pub drone: DroneSpec,
    pub scheduler: SchedulerSettings,
    pub retry: RetryPolicy,
    /// Delay between two submissions from the same producer.
    pub producer_pacing: Duration,
    /// How often dispatcher threads re-check for shutdown.
    pub server_poll: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        let drone = DroneSpec::default();
        Self {
            drones: 3,
            scheduler: SchedulerSettings {
                cruise_speed: drone.cruise_speed,
                base: drone.base,
                ..SchedulerSettings::default()
            },
            drone,
            retry: RetryPolicy::default(),
            producer_pacing: Duration::from_millis(800),
            server_poll: Duration::from_millis(50),
        }
    }
}

impl SimConfig {
    /// Compressed timing for the built-in demo: a simulated second lasts 2ms.
    pub fn demo() -> Self {
        Self::default()
            .with_tick(Duration::from_millis(2))
            .with_producer_pacing(Duration::from_millis(5))
            .with_reply_timeout(Duration::from_millis(200))
    }

    pub fn with_drones(mut self, drones: u32) -> Self {
        self.drones = drones;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.drone.tick = tick;
        self.drone.wait_poll = (tick * 5).max(Duration::from_millis(1));
        self
    }

    pub fn with_producer_pacing(mut self, pacing: Duration) -> Self {
        self.producer_pacing = pacing;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.retry.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts.max(1);
        self
    }

    /// Cruise speed is shared by drone physics and dispatcher travel planning.
    pub fn with_cruise_speed(mut self, speed: f64) -> Self {
        self.drone.cruise_speed = speed;
        self.scheduler.cruise_speed = speed;
        self
    }

    pub fn with_capacity(mut self, litres: i32) -> Self {
        self.drone.capacity = litres;
        self
    }

    pub fn with_battery(mut self, secs: f64) -> Self {
        self.drone.battery = secs;
        self
    }
}
