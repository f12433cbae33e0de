//! Control loop: one thread, one tick per period.
//!
//! ## RT Setup
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` to the configured core.
//! 4. `sched_setscheduler(SCHED_FIFO, priority)`.
//!
//! All four are no-ops without the `rt` feature.
//!
//! ## Tick
//! 1. Sense: `poll`, then one read of every axis, the shutter sensors, the
//!    e-stop line and the weather-alert file.
//! 2. Preemptions: e-stop halts every subsystem and interrupts every
//!    pending reply; a weather alert forces the shutter closed.
//! 3. At most one inbound command, channels served round-robin.
//! 4. Advance mount, dome, shutter, focus, filter in that order. The dome
//!    sees this tick's mount pointing; the shutter sees whether the dome
//!    sits at the power position.
//! 5. Hand found limits to the state file, flush replies and commit one
//!    telemetry snapshot.
//!
//! A failed hardware call anywhere fails every pending reply with `-6`,
//! halts everything and resets the binding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tcs_common::astro::SiteEphemeris;
use tcs_common::config::ConfigError;
use tcs_common::control_unit::state::{AxisId, ResponseCode, Subsystem};
use tcs_common::control_unit::telemetry::{AlertFlags, CycleTelemetry, TelemetrySnapshot};
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::hal::types::SwitchState;
use tcs_common::time::Timestamp;
use tracing::{debug, error, info, warn};

use crate::command::{
    ChannelId, ChannelTransport, Command, Dispatcher, DomeCommand, Role, TransportError,
    parse_command,
};
use crate::config::{LoadedConfig, load_config};
use crate::error::ControlError;
use crate::persist::{LimitsState, persist_found};
use crate::safety::StallMonitor;
use crate::state::{
    Accepted, DomeMachine, FoundLimits, MountMachine, OperationStateMachine, PositionerMachine,
    ShutterMachine, TickContext, Transition,
};
use crate::telemetry::{JsonPublisher, SnapshotBoard, TelemetryStore};

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-tick timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total ticks executed.
    pub cycle_count: u64,
    /// Last tick duration [ns].
    pub last_cycle_ns: i64,
    pub min_cycle_ns: i64,
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Ticks that took longer than the period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (time between expected and actual wake).
    pub max_latency_ns: i64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a tick duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average tick time [ns] (0 before the first tick).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }

    pub fn telemetry(&self) -> CycleTelemetry {
        let us = |ns: i64| (ns.max(0) / 1000) as u64;
        CycleTelemetry {
            last_us: us(self.last_cycle_ns),
            min_us: if self.cycle_count == 0 { 0 } else { us(self.min_cycle_ns) },
            max_us: us(self.max_cycle_ns),
            avg_us: us(self.avg_cycle_ns()),
            overruns: self.overruns,
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Errors during RT setup, start-up or loop pacing.
#[derive(Debug)]
pub enum CycleError {
    /// RT system call failed.
    RtSetup(String),
    /// Binding could not be initialised.
    Hardware(HardwareError),
    /// Channel transport could not be opened.
    Transport(TransportError),
    Config(ConfigError),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RtSetup(msg) => write!(f, "RT setup error: {msg}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Transport(e) => write!(f, "channels: {e}"),
            Self::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<HardwareError> for CycleError {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

impl From<TransportError> for CycleError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ConfigError> for CycleError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch the stack once so the loop never page-faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup sequence; call once before [`CycleRunner::run`].
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Subsystem Set ──────────────────────────────────────────────────

/// Every configured state machine. Each owns its axes exclusively.
pub struct Machines {
    pub mount: MountMachine,
    pub dome: Option<DomeMachine>,
    pub shutter: Option<ShutterMachine>,
    pub focus: Option<PositionerMachine>,
    pub filter: Option<PositionerMachine>,
}

impl Machines {
    pub fn build(config: &LoadedConfig, now: Timestamp) -> Self {
        let obs = &config.observatory;
        Self {
            mount: MountMachine::new(
                &obs.mount,
                config.mesh.clone(),
                Box::new(SiteEphemeris::new(&obs.site)),
                now,
            ),
            dome: obs.dome.as_ref().map(|c| DomeMachine::new(c, now)),
            shutter: obs.shutter.as_ref().map(|c| ShutterMachine::new(c, now)),
            focus: obs.focus.as_ref().map(|c| PositionerMachine::focus(c, now)),
            filter: obs.filter.as_ref().map(|c| PositionerMachine::filter(c, now)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn OperationStateMachine> {
        std::iter::once(&self.mount as &dyn OperationStateMachine)
            .chain(self.dome.as_ref().map(|m| m as &dyn OperationStateMachine))
            .chain(self.shutter.as_ref().map(|m| m as &dyn OperationStateMachine))
            .chain(self.focus.as_ref().map(|m| m as &dyn OperationStateMachine))
            .chain(self.filter.as_ref().map(|m| m as &dyn OperationStateMachine))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut dyn OperationStateMachine> {
        let Self {
            mount,
            dome,
            shutter,
            focus,
            filter,
        } = self;
        std::iter::once(mount as &mut dyn OperationStateMachine)
            .chain(dome.as_mut().map(|m| m as &mut dyn OperationStateMachine))
            .chain(shutter.as_mut().map(|m| m as &mut dyn OperationStateMachine))
            .chain(focus.as_mut().map(|m| m as &mut dyn OperationStateMachine))
            .chain(filter.as_mut().map(|m| m as &mut dyn OperationStateMachine))
    }

    pub fn get_mut(&mut self, subsystem: Subsystem) -> Option<&mut dyn OperationStateMachine> {
        self.iter_mut().find(|m| m.subsystem() == subsystem)
    }

    pub fn configured(&self, subsystem: Subsystem) -> bool {
        self.iter().any(|m| m.subsystem() == subsystem)
    }

    pub fn axis_ids(&self) -> Vec<AxisId> {
        self.iter().flat_map(|m| m.axis_ids()).collect()
    }

    fn take_found_limits(&mut self) -> Vec<FoundLimits> {
        let mut found = self.mount.take_found_limits();
        if let Some(dome) = self.dome.as_mut() {
            found.extend(dome.take_found_limits());
        }
        for positioner in [self.focus.as_mut(), self.filter.as_mut()].into_iter().flatten() {
            found.extend(positioner.take_found_limits());
        }
        found
    }

    /// Stop everything; keeps going past individual failures and
    /// returns the first one.
    fn halt_all(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        let mut first = None;
        for machine in self.iter_mut() {
            if let Err(e) = machine.halt(hw) {
                warn!(subsystem = %machine.subsystem(), error = %e, "halt failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// Inputs sensed once at the start of a tick.
#[derive(Debug, Clone, Copy, Default)]
struct Sensed {
    estop: bool,
    weather: bool,
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Owns the hardware, the channels and every subsystem machine.
pub struct CycleRunner {
    config: LoadedConfig,
    hw: Box<dyn HardwareBinding>,
    transport: Box<dyn ChannelTransport>,
    machines: Machines,
    dispatcher: Dispatcher,
    telemetry: TelemetryStore,
    stats: CycleStats,
    stall: StallMonitor,
    /// Configured period [ns].
    cycle_time_ns: i64,
    tick_count: u64,
    /// Round-robin position for command intake.
    next_channel: usize,
    sensed: Sensed,
    hw_fault: bool,
    overran: bool,
}

impl CycleRunner {
    /// Initialise the binding for every configured axis and build the
    /// machines. Saved travel limits are applied first.
    pub fn new(
        mut config: LoadedConfig,
        mut hw: Box<dyn HardwareBinding>,
        transport: Box<dyn ChannelTransport>,
        now: Timestamp,
    ) -> Result<Self, CycleError> {
        apply_saved_limits(&mut config);
        let machines = Machines::build(&config, now);
        let axes = machines.axis_ids();
        hw.init(&axes)?;
        info!(binding = hw.name(), axes = axes.len(), "hardware initialised");

        let cycle = &config.observatory.cycle;
        let file = cycle
            .telemetry_path
            .as_deref()
            .map(|path| JsonPublisher::new(path, cycle.telemetry_interval));
        let stall = StallMonitor::new(cycle.stall_ticks);
        let cycle_time_ns = cycle.cycle_time_ms as i64 * 1_000_000;

        Ok(Self {
            config,
            hw,
            transport,
            machines,
            dispatcher: Dispatcher::new(),
            telemetry: TelemetryStore::new(file),
            stats: CycleStats::new(),
            stall,
            cycle_time_ns,
            tick_count: 0,
            next_channel: 0,
            sensed: Sensed::default(),
            hw_fault: false,
            overran: false,
        })
    }

    pub fn config(&self) -> &LoadedConfig {
        &self.config
    }

    pub fn machines(&self) -> &Machines {
        &self.machines
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Snapshot committed by the last tick.
    pub fn snapshot(&self) -> &TelemetrySnapshot {
        self.telemetry.working()
    }

    pub fn board(&self) -> Arc<SnapshotBoard> {
        self.telemetry.board()
    }

    fn period_secs(&self) -> f64 {
        self.config.observatory.cycle.period_secs()
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Run one complete tick at wall-clock time `now`.
    pub fn tick(&mut self, now: Timestamp) {
        self.tick_count += 1;
        self.hw_fault = false;

        match self.sense() {
            Ok(sensed) => {
                self.sensed = sensed;
                if let Err(e) = self.preempt(now) {
                    self.hardware_fault(e, now);
                }
                if !self.hw_fault {
                    self.intake(now);
                }
                if !self.hw_fault {
                    if let Err(e) = self.advance_all(now) {
                        self.hardware_fault(e, now);
                    }
                }
                self.persist_limits();
            }
            Err(e) => self.hardware_fault(e, now),
        }

        self.flush_replies();
        self.publish(now);
    }

    fn sense(&mut self) -> Result<Sensed, HardwareError> {
        let dt = Duration::from_secs_f64(self.period_secs());
        self.hw.poll(dt)?;
        for machine in self.machines.iter_mut() {
            machine.readraw(self.hw.as_mut())?;
        }
        let estop = self.hw.read_estop()?;
        let weather = self
            .config
            .observatory
            .hardware
            .weather_alert_file
            .as_deref()
            .is_some_and(|path| path.exists());
        Ok(Sensed { estop, weather })
    }

    /// E-stop and weather, strictly before any command.
    fn preempt(&mut self, now: Timestamp) -> Result<(), HardwareError> {
        let was_estop = self.telemetry.working().alerts.contains(AlertFlags::ESTOP);
        if self.sensed.estop {
            if !was_estop {
                warn!("emergency stop asserted");
            }
            for machine in self.machines.iter_mut() {
                if machine.state().is_active() {
                    warn!(subsystem = %machine.subsystem(), "halted by emergency stop");
                    machine.halt(self.hw.as_mut())?;
                }
            }
            self.dispatcher.interrupt_all("emergency stop");
            return Ok(());
        }
        if was_estop {
            info!("emergency stop cleared");
        }

        if self.sensed.weather {
            let Self {
                machines,
                hw,
                dispatcher,
                config,
                stall,
                ..
            } = self;
            if let Some(shutter) = machines.shutter.as_mut() {
                let mut ctx = TickContext {
                    now,
                    dt: config.observatory.cycle.period_secs(),
                    hw: hw.as_mut(),
                    on_target_ticks: config.observatory.cycle.on_target_ticks,
                    stall: *stall,
                };
                match shutter.force_close(&mut ctx) {
                    Ok(true) => {
                        warn!("weather alert: closing shutter");
                        dispatcher.interrupt(Subsystem::Shutter, "weather alert");
                    }
                    Ok(false) => {}
                    Err(ControlError::Hardware(e)) => return Err(e),
                    Err(e) => warn!(error = %e, "weather close refused"),
                }
            }
        }
        Ok(())
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Take at most one line, scanning channels round-robin.
    fn intake(&mut self, now: Timestamp) {
        let count = ChannelId::ALL.len();
        for offset in 0..count {
            let index = (self.next_channel + offset) % count;
            let channel = ChannelId::ALL[index];
            match self.transport.read_line(channel) {
                Ok(Some(line)) => {
                    self.next_channel = (index + 1) % count;
                    self.handle_line(channel, &line, now);
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!(%channel, error = %e, "channel read failed"),
            }
        }
    }

    fn handle_line(&mut self, channel: ChannelId, line: &str, now: Timestamp) {
        debug!(%channel, line, "command received");
        let command = match parse_command(line, now) {
            Ok(command) => command,
            Err(e) => return self.answer(channel, ResponseCode::FormatError, e.to_string()),
        };
        if !channel.accepts(&command) {
            return self.answer(
                channel,
                ResponseCode::FormatError,
                format!("'{}' is not a {channel} command", command.keyword()),
            );
        }
        if self.sensed.estop && command.is_motion() {
            return self.answer(channel, ResponseCode::Rejected, "emergency stop asserted");
        }

        match command {
            Command::Reset => self.reset(channel, now),
            Command::Stop => self.stop(channel, now),
            command => {
                let subsystem = channel.subsystem();
                if !self.machines.configured(subsystem) {
                    return self.answer(
                        channel,
                        ResponseCode::Rejected,
                        format!("{subsystem} not configured"),
                    );
                }
                match self.execute(subsystem, command, now) {
                    Ok(Accepted::Operation) => {
                        self.dispatcher
                            .begin(channel, subsystem, Role::Operation, line, now);
                    }
                    Ok(Accepted::Nudge) => {
                        self.dispatcher.begin(channel, subsystem, Role::Nudge, line, now);
                    }
                    Ok(Accepted::Immediate(message)) => {
                        self.answer(channel, ResponseCode::Ok, message);
                    }
                    Err(ControlError::Hardware(e)) => {
                        self.answer(channel, ResponseCode::HardwareError, e.to_string());
                        self.hardware_fault(e, now);
                    }
                    Err(e) => {
                        debug!(%channel, error = %e, "command refused");
                        self.answer(channel, e.response_code(), e.to_string());
                    }
                }
            }
        }
    }

    /// Retire the channel's pending reply and answer right away.
    fn answer(&mut self, channel: ChannelId, code: ResponseCode, message: impl Into<String>) {
        self.dispatcher.retire(channel);
        self.dispatcher.reply(channel, code, message);
    }

    fn execute(
        &mut self,
        subsystem: Subsystem,
        command: Command,
        now: Timestamp,
    ) -> Result<Accepted, ControlError> {
        let weather = self.sensed.weather;
        let Self {
            machines,
            hw,
            config,
            stall,
            ..
        } = self;
        let mut ctx = TickContext {
            now,
            dt: config.observatory.cycle.period_secs(),
            hw: hw.as_mut(),
            on_target_ticks: config.observatory.cycle.on_target_ticks,
            stall: *stall,
        };
        let unavailable = || ControlError::rejected(format!("{subsystem} not configured"));

        match (subsystem, command) {
            (Subsystem::Mount, Command::Home(mask)) => machines.mount.home(&mask.axes(), &mut ctx),
            (Subsystem::Mount, Command::Limits(mask)) => {
                machines.mount.limits_run(&mask.axes(), &mut ctx)
            }
            (Subsystem::Mount, Command::Slew(object)) => machines.mount.slew(object, &mut ctx),
            (Subsystem::Mount, Command::Track(object)) => machines.mount.track(object, &mut ctx),
            (Subsystem::Mount, Command::Offset { ra, dec }) => Ok(machines.mount.offset(ra, dec)),
            (Subsystem::Mount, Command::Jog(jog)) => machines.mount.jog(jog, &mut ctx),

            (Subsystem::Dome, command) => {
                let dome = machines.dome.as_mut().ok_or_else(unavailable)?;
                match command {
                    Command::Home(_) => dome.home(&mut ctx),
                    Command::Limits(_) => dome.limits_run(&mut ctx),
                    Command::Dome(DomeCommand::Goto(az)) => dome.goto(az, &mut ctx),
                    Command::Dome(DomeCommand::Auto) => dome.auto_follow(&mut ctx),
                    Command::Dome(DomeCommand::Manual) => dome.manual(ctx.hw),
                    other => Err(misrouted(&other)),
                }
            }

            (Subsystem::Shutter, command) => {
                let shutter = machines.shutter.as_mut().ok_or_else(unavailable)?;
                match command {
                    Command::Open => shutter.open(weather, &mut ctx),
                    Command::Close => shutter.close(&mut ctx),
                    other => Err(misrouted(&other)),
                }
            }

            (Subsystem::Focus, command) => {
                let focus = machines.focus.as_mut().ok_or_else(unavailable)?;
                match command {
                    Command::Home(_) => focus.home(&mut ctx),
                    Command::Limits(_) => focus.limits_run(&mut ctx),
                    Command::Focus(microns) => focus.focus_by(microns, &mut ctx),
                    other => Err(misrouted(&other)),
                }
            }

            (Subsystem::Filter, command) => {
                let filter = machines.filter.as_mut().ok_or_else(unavailable)?;
                match command {
                    Command::Home(_) => filter.home(&mut ctx),
                    Command::Limits(_) => filter.limits_run(&mut ctx),
                    Command::Filter(name) => filter.select_filter(&name, &mut ctx),
                    other => Err(misrouted(&other)),
                }
            }

            (_, other) => Err(misrouted(&other)),
        }
    }

    fn stop(&mut self, channel: ChannelId, now: Timestamp) {
        let scope = channel.stop_scope();
        for subsystem in scope {
            if let Some(machine) = self.machines.get_mut(*subsystem) {
                if let Err(e) = machine.stop(self.hw.as_mut()) {
                    self.answer(channel, ResponseCode::HardwareError, e.to_string());
                    return self.hardware_fault(e, now);
                }
            }
        }
        info!(%channel, "stop");
        self.dispatcher.stop(channel, scope);
    }

    /// Reload the configuration, reset the binding and rebuild every
    /// machine. Everyone waiting is interrupted.
    fn reset(&mut self, channel: ChannelId, now: Timestamp) {
        let reloaded = match self.config.source.clone() {
            Some(path) => match load_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, "reset: configuration reload failed");
                    return self.answer(channel, ResponseCode::Rejected, e.to_string());
                }
            },
            None => self.config.clone(),
        };
        if let Err(e) = self.machines.halt_all(self.hw.as_mut()) {
            warn!(error = %e, "reset: halt failed");
        }
        self.dispatcher.retire(channel);
        self.dispatcher.interrupt_all("reset");
        self.config = reloaded;
        apply_saved_limits(&mut self.config);
        match self.rebuild(now) {
            Ok(()) => {
                info!("reset complete");
                self.dispatcher.reply(channel, ResponseCode::Ok, "reset");
            }
            Err(e) => {
                error!(error = %e, "reset: hardware reinitialisation failed");
                self.hw_fault = true;
                self.dispatcher
                    .reply(channel, ResponseCode::HardwareError, e.to_string());
            }
        }
    }

    /// Reset + init the binding and start every machine afresh.
    fn rebuild(&mut self, now: Timestamp) -> Result<(), HardwareError> {
        self.machines = Machines::build(&self.config, now);
        *self.telemetry.working_mut() = TelemetrySnapshot::default();
        self.stall = StallMonitor::new(self.config.observatory.cycle.stall_ticks);
        self.hw.reset()?;
        self.hw.init(&self.machines.axis_ids())
    }

    // ─── Advance ────────────────────────────────────────────────────

    fn advance_all(&mut self, now: Timestamp) -> Result<(), HardwareError> {
        let Self {
            machines,
            hw,
            dispatcher,
            config,
            stall,
            ..
        } = self;
        let mut ctx = TickContext {
            now,
            dt: config.observatory.cycle.period_secs(),
            hw: hw.as_mut(),
            on_target_ticks: config.observatory.cycle.on_target_ticks,
            stall: *stall,
        };

        let transition = machines.mount.advance(&mut ctx)?;
        settle(dispatcher, Subsystem::Mount, transition);
        let pointing = machines.mount.pointing();

        let power = machines.shutter.as_ref().and_then(|s| s.power_request());
        if let Some(dome) = machines.dome.as_mut() {
            match power {
                Some(power) => match dome.request_power(&power, &mut ctx) {
                    Ok(true) => {
                        info!("dome moving to shutter power position");
                        dispatcher.interrupt(Subsystem::Dome, "dome needed by the shutter");
                    }
                    Ok(false) => {}
                    Err(ControlError::Hardware(e)) => return Err(e),
                    Err(e) => warn!(error = %e, "dome cannot reach the power position"),
                },
                None => dome.release_power(&mut ctx),
            }
            let transition = dome.advance(&mut ctx, &pointing)?;
            settle(dispatcher, Subsystem::Dome, transition);
        }

        if let Some(shutter) = machines.shutter.as_mut() {
            let dome_ready = match (power, machines.dome.as_ref()) {
                (Some(power), Some(dome)) => dome.in_power_position(&power),
                _ => true,
            };
            let transition = shutter.advance(&mut ctx, dome_ready)?;
            settle(dispatcher, Subsystem::Shutter, transition);
        }

        for positioner in [machines.focus.as_mut(), machines.filter.as_mut()]
            .into_iter()
            .flatten()
        {
            let subsystem = positioner.subsystem();
            let transition = positioner.advance(&mut ctx)?;
            settle(dispatcher, subsystem, transition);
        }
        Ok(())
    }

    fn hardware_fault(&mut self, error: HardwareError, now: Timestamp) {
        error!(%error, "hardware error: failing pending commands and resetting");
        self.hw_fault = true;
        self.dispatcher.hardware_fault(&error.to_string());
        if let Err(e) = self.machines.halt_all(self.hw.as_mut()) {
            error!(error = %e, "halt after hardware error failed");
        }
        match self.rebuild(now) {
            Ok(()) => info!("hardware reset complete"),
            Err(e) => error!(error = %e, "hardware reset failed"),
        }
    }

    fn persist_limits(&mut self) {
        let found = self.machines.take_found_limits();
        if found.is_empty() {
            return;
        }
        let Some(path) = self.config.observatory.cycle.limits_state_file.as_deref() else {
            return;
        };
        if let Err(e) = persist_found(path, &found) {
            warn!(error = %e, "could not save found limits");
        }
    }

    // ─── Output ─────────────────────────────────────────────────────

    fn flush_replies(&mut self) {
        for reply in self.dispatcher.take_replies() {
            let line = reply.line();
            debug!(channel = %reply.channel, %line, "response sent");
            if let Err(e) = self.transport.write_line(reply.channel, &line) {
                warn!(channel = %reply.channel, error = %e, "response lost");
            }
        }
    }

    fn publish(&mut self, now: Timestamp) {
        let on_target_ticks = self.config.observatory.cycle.on_target_ticks;
        let snapshot = self.telemetry.working_mut();
        snapshot.tick = self.tick_count;
        snapshot.timestamp = now;
        for machine in self.machines.iter() {
            machine.telemetry(snapshot, on_target_ticks);
        }
        for entry in snapshot.subsystems.iter_mut() {
            entry.owner = self
                .dispatcher
                .owner(entry.subsystem)
                .map(|c| c.as_str().to_string());
        }

        let mut alerts = AlertFlags::empty();
        alerts.set(AlertFlags::ESTOP, self.sensed.estop);
        alerts.set(AlertFlags::WEATHER, self.sensed.weather);
        alerts.set(AlertFlags::HW_FAULT, self.hw_fault);
        alerts.set(AlertFlags::CYCLE_OVERRUN, self.overran);
        alerts.set(AlertFlags::NOT_HOMED, !self.machines.mount.homed());
        for machine in self.machines.iter() {
            for axis in machine.axes() {
                if axis.stall_ticks > 0 {
                    alerts.insert(AlertFlags::STALL_WARNING);
                }
                if axis
                    .switches
                    .intersects(SwitchState::POS_LIMIT | SwitchState::NEG_LIMIT)
                {
                    alerts.insert(AlertFlags::LIMIT_SWITCH);
                }
            }
        }
        snapshot.alerts = alerts;
        snapshot.cycle = self.stats.telemetry();

        if let Err(e) = self.telemetry.commit() {
            warn!(error = %e, "telemetry publication failed");
        }
    }

    // ─── Loop ───────────────────────────────────────────────────────

    /// Record one tick's duration; overruns are logged, never fatal.
    pub fn record_cycle(&mut self, duration_ns: i64, latency_ns: i64) {
        self.stats.record(duration_ns, latency_ns);
        self.overran = duration_ns > self.cycle_time_ns;
        if self.overran {
            self.stats.overruns += 1;
            warn!(
                duration_us = duration_ns / 1000,
                budget_us = self.cycle_time_ns / 1000,
                "cycle overrun"
            );
        }
    }

    /// Run ticks until `running` is cleared, then halt everything.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), CycleError> {
        info!(
            period_ms = self.config.observatory.cycle.cycle_time_ms,
            "control loop started"
        );

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop(running);

        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop(running);

        self.shutdown();
        result
    }

    /// Absolute-time pacing with `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self, running: &AtomicBool) -> Result<(), CycleError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let mut next_wake = clock_gettime(clock)
            .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;

        while running.load(Ordering::SeqCst) {
            next_wake = timespec_add_ns(next_wake, self.cycle_time_ns);

            let cycle_start = clock_gettime(clock)
                .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;

            self.tick(Timestamp::now());

            let cycle_end = clock_gettime(clock)
                .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;
            let duration_ns = timespec_diff_ns(&cycle_end, &cycle_start);
            let latency_ns =
                timespec_diff_ns(&cycle_start, &timespec_add_ns(next_wake, -self.cycle_time_ns))
                    .abs();
            self.record_cycle(duration_ns, latency_ns);

            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
        Ok(())
    }

    /// Relative pacing with `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self, running: &AtomicBool) -> Result<(), CycleError> {
        use std::time::Instant;

        let period = Duration::from_nanos(self.cycle_time_ns as u64);
        while running.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            self.tick(Timestamp::now());
            let elapsed = cycle_start.elapsed();
            self.record_cycle(elapsed.as_nanos() as i64, 0);
            if let Some(remaining) = period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }

    /// Halt every axis and release every waiting channel.
    pub fn shutdown(&mut self) {
        info!("control loop stopping");
        if let Err(e) = self.machines.halt_all(self.hw.as_mut()) {
            error!(error = %e, "halt at shutdown failed");
        }
        self.dispatcher.interrupt_all("daemon shutting down");
        self.flush_replies();
    }
}

fn apply_saved_limits(config: &mut LoadedConfig) {
    let Some(path) = config.observatory.cycle.limits_state_file.clone() else {
        return;
    };
    match LimitsState::load(&path) {
        Ok(state) => {
            state.apply(&mut config.observatory);
        }
        Err(e) => warn!(error = %e, "saved limits ignored"),
    }
}

fn misrouted(command: &Command) -> ControlError {
    ControlError::rejected(format!("'{}' does not apply here", command.keyword()))
}

/// Route one machine transition to the waiting channels.
fn settle(dispatcher: &mut Dispatcher, subsystem: Subsystem, transition: Transition) {
    match transition {
        Transition::Continue => {}
        Transition::Progress(message) => dispatcher.progress(subsystem, &message),
        Transition::Lock(message) | Transition::Done(message) => {
            dispatcher.complete(subsystem, &message)
        }
        Transition::Unlock(message) => info!(%subsystem, %message, "lock lost"),
        Transition::Abort(error) => dispatcher.fail(subsystem, &error),
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────
