//! Shared rig for the integration scenarios.

mod channels;
mod config_load;
mod estop;
mod homing;
mod slew;
mod tracking;

use tcs_common::time::Timestamp;
use tcs_control_unit::command::{ChannelId, MemoryChannels, MemoryTransport};
use tcs_control_unit::config::{LoadedConfig, load_config_from_str};
use tcs_control_unit::cycle::CycleRunner;
use tcs_hal::{SimHandle, SimulationBinding};

/// Full observatory, 100 ms ticks.
pub const CONFIG: &str = r#"
[loop]
cycle_time_ms = 100
on_target_ticks = 3
stall_ticks = 3

[site]
latitude = 30.0
longitude = 0.0

[mount]
tracking_accuracy = 0.0002
jog_fast = 0.02
jog_slow = 0.001

[mount.timeouts]
home = 120.0
limits = 300.0
slew = 60.0
hunt = 30.0

[mount.x]
name = "HA"
step_count = 360000
max_velocity = 0.1
max_accel_slew = 0.05
max_accel_track = 0.02
pos_limit = 3.2
neg_limit = -3.2
limit_margin = 0.01
has_limit_switches = true
limit_speed = 0.05

[mount.x.home]
switch = true
direction = 1
speed = 0.02

[mount.y]
name = "Dec"
step_count = 360000
max_velocity = 0.1
max_accel_slew = 0.05
max_accel_track = 0.02
pos_limit = 1.6
neg_limit = -1.6
limit_margin = 0.01
has_limit_switches = true
limit_speed = 0.05

[mount.y.home]
switch = true
direction = 1
speed = 0.02

[dome]
auto_follow_tolerance = 0.05

[dome.az]
name = "Dome"
step_count = 36000
max_velocity = 0.1
max_accel_slew = 0.05
max_accel_track = 0.05
pos_limit = 20.0
neg_limit = -20.0

[dome.az.home]
travel_time = 1.0

[dome.timeouts]
slew = 120.0

[shutter]
timeout = 30.0

[shutter.power_position]
azimuth = 0.0
tolerance = 0.05

[focus]
microns_per_rev = 500.0

[focus.axis]
name = "Focus"
step_count = 20000
max_velocity = 1.0
max_accel_slew = 2.0
max_accel_track = 2.0
pos_limit = 30.0
neg_limit = -30.0

[filter]
slots = [
    { name = "R", position = 0.0 },
    { name = "V", position = 1.5 },
    { name = "B", position = -1.5 },
]

[filter.axis]
name = "Filter"
step_count = 3600
max_velocity = 0.5
max_accel_slew = 1.0
max_accel_track = 1.0
pos_limit = 3.2
neg_limit = -3.2
"#;

/// Epoch of tick 0.
pub const T0: f64 = 1_700_000_000.0;

pub fn at(tick: usize) -> Timestamp {
    Timestamp::from_unix_secs(T0 + tick as f64 * 0.1)
}

/// Runner, client side of its channels and the simulated hardware.
pub struct Observatory {
    pub runner: CycleRunner,
    pub channels: MemoryChannels,
    pub sim: SimHandle,
    pub tick: usize,
}

impl Observatory {
    pub fn new() -> Self {
        Self::with_config(load_config_from_str(CONFIG).unwrap())
    }

    pub fn with_config(loaded: LoadedConfig) -> Self {
        let hw = SimulationBinding::new(&loaded.observatory);
        let sim = hw.handle();
        sim.set_shutter_travel(2.0);
        let transport = MemoryTransport::new();
        let channels = transport.channels();
        let runner = CycleRunner::new(loaded, Box::new(hw), Box::new(transport), at(0)).unwrap();
        Self {
            runner,
            channels,
            sim,
            tick: 0,
        }
    }

    pub fn send(&self, channel: ChannelId, line: &str) {
        self.channels.push(channel, line);
    }

    pub fn step(&mut self) {
        self.tick += 1;
        self.runner.tick(at(self.tick));
    }

    pub fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    /// Replies on `channel` since the last call.
    pub fn replies(&self, channel: ChannelId) -> Vec<String> {
        self.channels.take_output(channel)
    }

    /// Send one line and run one tick; returns the replies it produced.
    pub fn command(&mut self, channel: ChannelId, line: &str) -> Vec<String> {
        self.send(channel, line);
        self.step();
        self.replies(channel)
    }

    /// Tick until `channel` gets a terminal (non-progress) reply.
    /// Returns every line received, the terminal one last.
    pub fn run_until_reply(&mut self, channel: ChannelId, max_ticks: usize) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..max_ticks {
            self.step();
            for line in self.replies(channel) {
                let terminal = !line.starts_with("1 ");
                lines.push(line);
                if terminal {
                    return lines;
                }
            }
        }
        panic!("no terminal reply on {channel} after {max_ticks} ticks: {lines:?}");
    }
}

/// Numeric code of a reply line.
pub fn code(line: &str) -> i32 {
    line.split_whitespace()
        .next()
        .and_then(|c| c.parse().ok())
        .unwrap_or_else(|| panic!("malformed reply {line:?}"))
}
