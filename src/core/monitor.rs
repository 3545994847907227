//! Process resource monitor that raises and clears a throttle flag.
//!
//! A dedicated OS thread samples CPU and memory every interval. Stopping uses
//! a `parking_lot::Condvar`, so the thread wakes immediately instead of
//! finishing its sleep. Throttle transitions are edge-triggered and published
//! as [`MonitorEvent`]s through an [`EventDispatcher`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::core::notify::EventDispatcher;
use crate::core::ControlError;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One measurement of process resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// CPU usage in percent of total machine capacity.
    pub cpu_percent: f64,
    /// Resident memory in megabytes.
    pub memory_mb: u64,
}

/// Source of resource measurements.
pub trait ResourceSampler: Send {
    /// Measure current usage. CPU is averaged over the time since the last call.
    fn sample(&mut self) -> ResourceSample;
}

/// Samples this process through `sysinfo`.
pub struct ProcessSampler {
    system: System,
    pid: Pid,
    cpus: f64,
}

impl fmt::Debug for ProcessSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSampler")
            .field("pid", &self.pid)
            .field("cpus", &self.cpus)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    /// Sampler for the current process.
    pub fn new() -> Self {
        #[allow(clippy::cast_precision_loss)]
        let cpus = num_cpus::get().max(1) as f64;
        let mut sampler = Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            cpus,
        };
        // prime the CPU counters so the first real sample has a baseline
        sampler.refresh();
        sampler
    }

    fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
    }
}

impl ResourceSampler for ProcessSampler {
    fn sample(&mut self) -> ResourceSample {
        self.refresh();
        match self.system.process(self.pid) {
            Some(process) => ResourceSample {
                cpu_percent: f64::from(process.cpu_usage()) / self.cpus,
                memory_mb: process.memory() / BYTES_PER_MB,
            },
            None => {
                warn!(pid = %self.pid, "current process not visible to sampler");
                ResourceSample::default()
            }
        }
    }
}

/// Monitor thresholds and sampling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// CPU ceiling in percent.
    pub max_cpu_percent: f64,
    /// Memory ceiling in megabytes.
    pub max_memory_mb: u64,
    /// Throttle when CPU exceeds its ceiling.
    pub throttle_cpu: bool,
    /// Throttle when memory exceeds its ceiling.
    pub throttle_memory: bool,
    /// Time between samples.
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            max_memory_mb: 4096,
            throttle_cpu: true,
            throttle_memory: true,
            interval: Duration::from_secs(1),
        }
    }
}

/// Which ceilings were exceeded when throttling began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottledResource {
    /// CPU only.
    Cpu,
    /// Memory only.
    Memory,
    /// CPU and memory.
    CpuAndMemory,
}

impl ThrottledResource {
    /// Name passed to throttle subscribers.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::CpuAndMemory => "cpu,memory",
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::Cpu => 1,
            Self::Memory => 2,
            Self::CpuAndMemory => 3,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Cpu),
            2 => Some(Self::Memory),
            3 => Some(Self::CpuAndMemory),
            _ => None,
        }
    }
}

impl fmt::Display for ThrottledResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Throttle flag transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// The flag went from clear to set.
    Throttled(ThrottledResource),
    /// The flag went from set to clear.
    Unthrottled,
}

impl MonitorEvent {
    /// Resource name: `"cpu"`, `"memory"`, `"cpu,memory"`, or `"all"` on unthrottle.
    pub const fn resource(&self) -> &'static str {
        match self {
            Self::Throttled(resource) => resource.as_str(),
            Self::Unthrottled => "all",
        }
    }
}

/// Combined monitoring snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorMetrics {
    /// Last sampled CPU percent.
    pub cpu_percent: f64,
    /// Last sampled memory in MB.
    pub memory_mb: u64,
    /// Throttle flag.
    pub throttled: bool,
    /// Configured CPU ceiling.
    pub max_cpu_percent: f64,
    /// Configured memory ceiling.
    pub max_memory_mb: u64,
}

/// Values shared between callers and the sampling thread.
#[derive(Debug)]
struct MonitorShared {
    max_cpu_bits: AtomicU64,
    max_memory_mb: AtomicU64,
    throttle_cpu: AtomicBool,
    throttle_memory: AtomicBool,
    current_cpu_bits: AtomicU64,
    current_memory_mb: AtomicU64,
    throttled: AtomicBool,
    throttled_on: AtomicU8,
    cycles: AtomicU64,
}

impl MonitorShared {
    fn cycle(
        &self,
        sampler: &Mutex<Box<dyn ResourceSampler>>,
        dispatcher: Option<&EventDispatcher<MonitorEvent>>,
    ) {
        let sample = sampler.lock().sample();
        self.current_cpu_bits
            .store(sample.cpu_percent.to_bits(), Ordering::Release);
        self.current_memory_mb
            .store(sample.memory_mb, Ordering::Release);
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let max_cpu = f64::from_bits(self.max_cpu_bits.load(Ordering::Acquire));
        let max_memory = self.max_memory_mb.load(Ordering::Acquire);
        let cpu_over = self.throttle_cpu.load(Ordering::Acquire) && sample.cpu_percent > max_cpu;
        let memory_over =
            self.throttle_memory.load(Ordering::Acquire) && sample.memory_mb > max_memory;

        let event = match (cpu_over, memory_over) {
            (false, false) => {
                self.throttled_on.store(0, Ordering::Release);
                self.throttled
                    .swap(false, Ordering::AcqRel)
                    .then_some(MonitorEvent::Unthrottled)
            }
            (cpu, memory) => {
                let resource = match (cpu, memory) {
                    (true, true) => ThrottledResource::CpuAndMemory,
                    (true, false) => ThrottledResource::Cpu,
                    _ => ThrottledResource::Memory,
                };
                self.throttled_on.store(resource.code(), Ordering::Release);
                (!self.throttled.swap(true, Ordering::AcqRel))
                    .then_some(MonitorEvent::Throttled(resource))
            }
        };

        match event {
            Some(MonitorEvent::Throttled(resource)) => warn!(
                resource = %resource,
                cpu_percent = sample.cpu_percent,
                memory_mb = sample.memory_mb,
                "resource ceiling exceeded, throttling"
            ),
            Some(MonitorEvent::Unthrottled) => info!(
                cpu_percent = sample.cpu_percent,
                memory_mb = sample.memory_mb,
                "resources back under limits, throttle cleared"
            ),
            None => {}
        }
        if let (Some(event), Some(dispatcher)) = (event, dispatcher) {
            dispatcher.dispatch(event);
        }
    }
}

/// Stop flag plus the condvar the sampling thread sleeps on.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

#[derive(Debug)]
struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<StopSignal>,
}

/// Samples process usage on an interval and maintains the throttle flag.
pub struct ResourceMonitor {
    shared: Arc<MonitorShared>,
    sampler: Arc<Mutex<Box<dyn ResourceSampler>>>,
    dispatcher: Option<EventDispatcher<MonitorEvent>>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("metrics", &self.metrics())
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    /// Monitor for the current process.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_sampler(config, Box::new(ProcessSampler::new()))
    }

    /// Monitor driven by a custom sampler.
    pub fn with_sampler(config: MonitorConfig, sampler: Box<dyn ResourceSampler>) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                max_cpu_bits: AtomicU64::new(config.max_cpu_percent.to_bits()),
                max_memory_mb: AtomicU64::new(config.max_memory_mb),
                throttle_cpu: AtomicBool::new(config.throttle_cpu),
                throttle_memory: AtomicBool::new(config.throttle_memory),
                current_cpu_bits: AtomicU64::new(0f64.to_bits()),
                current_memory_mb: AtomicU64::new(0),
                throttled: AtomicBool::new(false),
                throttled_on: AtomicU8::new(0),
                cycles: AtomicU64::new(0),
            }),
            sampler: Arc::new(Mutex::new(sampler)),
            dispatcher: None,
            interval: config.interval.max(Duration::from_millis(1)),
            worker: Mutex::new(None),
        }
    }

    /// Publish throttle transitions to `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher<MonitorEvent>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Start the sampling thread. No-op if already running.
    ///
    /// # Errors
    ///
    /// `Backend` if the thread cannot be spawned.
    pub fn start(&self) -> Result<(), ControlError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new(StopSignal::default());
        let shared = Arc::clone(&self.shared);
        let sampler = Arc::clone(&self.sampler);
        let dispatcher = self.dispatcher.clone();
        let interval = self.interval;
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("ta-resource-monitor".into())
            .spawn(move || {
                debug!("resource monitor started");
                loop {
                    shared.cycle(&sampler, dispatcher.as_ref());
                    let mut stopped = thread_stop.stopped.lock();
                    if !*stopped {
                        thread_stop.condvar.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                debug!("resource monitor stopped");
            })
            .map_err(|e| ControlError::Backend(format!("spawn resource monitor: {e}")))?;

        *worker = Some(Worker { handle, stop });
        Ok(())
    }

    /// Stop the sampling thread and wait for it to exit. No-op if not running.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        *worker.stop.stopped.lock() = true;
        worker.stop.condvar.notify_all();
        if worker.handle.join().is_err() {
            warn!("resource monitor thread panicked");
        }
    }

    /// True while the sampling thread runs.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Run one sampling cycle on the calling thread.
    pub fn sample_now(&self) {
        self.shared.cycle(&self.sampler, self.dispatcher.as_ref());
    }

    /// Completed sampling cycles.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Adjust ceilings; the next cycle uses them.
    pub fn set_limits(&self, max_cpu_percent: f64, max_memory_mb: u64) {
        self.shared
            .max_cpu_bits
            .store(max_cpu_percent.to_bits(), Ordering::Release);
        self.shared
            .max_memory_mb
            .store(max_memory_mb, Ordering::Release);
        debug!(max_cpu_percent, max_memory_mb, "resource limits updated");
    }

    /// Enable or disable throttling per resource.
    pub fn set_throttling(&self, cpu: bool, memory: bool) {
        self.shared.throttle_cpu.store(cpu, Ordering::Release);
        self.shared.throttle_memory.store(memory, Ordering::Release);
    }

    /// Current `(max_cpu_percent, max_memory_mb)`.
    pub fn limits(&self) -> (f64, u64) {
        (
            f64::from_bits(self.shared.max_cpu_bits.load(Ordering::Acquire)),
            self.shared.max_memory_mb.load(Ordering::Acquire),
        )
    }

    /// Last sampled CPU percent.
    pub fn current_cpu(&self) -> f64 {
        f64::from_bits(self.shared.current_cpu_bits.load(Ordering::Acquire))
    }

    /// Last sampled memory in MB.
    pub fn current_memory_mb(&self) -> u64 {
        self.shared.current_memory_mb.load(Ordering::Acquire)
    }

    /// True while any enabled ceiling is exceeded.
    pub fn is_throttled(&self) -> bool {
        self.shared.throttled.load(Ordering::Acquire)
    }

    /// Ceilings exceeded by the last sample, if throttled.
    pub fn throttled_resource(&self) -> Option<ThrottledResource> {
        ThrottledResource::from_code(self.shared.throttled_on.load(Ordering::Acquire))
    }

    /// Combined snapshot.
    pub fn metrics(&self) -> MonitorMetrics {
        let (max_cpu_percent, max_memory_mb) = self.limits();
        MonitorMetrics {
            cpu_percent: self.current_cpu(),
            memory_mb: self.current_memory_mb(),
            throttled: self.is_throttled(),
            max_cpu_percent,
            max_memory_mb,
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sampler whose next value the test controls.
    struct Scripted(Arc<Mutex<ResourceSample>>);

    impl ResourceSampler for Scripted {
        fn sample(&mut self) -> ResourceSample {
            *self.0.lock()
        }
    }

    fn scripted(cpu: f64, memory_mb: u64) -> (ResourceMonitor, Arc<Mutex<ResourceSample>>) {
        let value = Arc::new(Mutex::new(ResourceSample {
            cpu_percent: cpu,
            memory_mb,
        }));
        let config = MonitorConfig {
            max_cpu_percent: 50.0,
            max_memory_mb: 100,
            interval: Duration::from_millis(10),
            ..MonitorConfig::default()
        };
        let monitor = ResourceMonitor::with_sampler(config, Box::new(Scripted(Arc::clone(&value))));
        (monitor, value)
    }

    #[test]
    fn test_throttle_is_edge_triggered() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let dispatcher = EventDispatcher::spawn("monitor-test", 16, move |e: MonitorEvent| {
            let _ = events_tx.send(e);
        })
        .unwrap();
        let (monitor, value) = scripted(90.0, 10);
        let monitor = monitor.with_dispatcher(dispatcher);

        monitor.sample_now();
        monitor.sample_now();
        assert!(monitor.is_throttled());
        assert_eq!(
            events_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            MonitorEvent::Throttled(ThrottledResource::Cpu)
        );

        *value.lock() = ResourceSample {
            cpu_percent: 10.0,
            memory_mb: 10,
        };
        monitor.sample_now();
        monitor.sample_now();
        assert!(!monitor.is_throttled());
        let event = events_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, MonitorEvent::Unthrottled);
        assert_eq!(event.resource(), "all");
        assert!(events_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_both_resources_reported() {
        let (monitor, _value) = scripted(90.0, 500);
        monitor.sample_now();
        let metrics = monitor.metrics();
        assert!(metrics.throttled);
        assert_eq!(metrics.memory_mb, 500);
        assert!((metrics.cpu_percent - 90.0).abs() < f64::EPSILON);
        assert_eq!(
            monitor.throttled_resource(),
            Some(ThrottledResource::CpuAndMemory)
        );
        assert_eq!(ThrottledResource::CpuAndMemory.as_str(), "cpu,memory");
    }

    #[test]
    fn test_disabled_throttling_ignores_ceiling() {
        let (monitor, _value) = scripted(90.0, 500);
        monitor.set_throttling(false, false);
        monitor.sample_now();
        assert!(!monitor.is_throttled());
    }

    #[test]
    fn test_set_limits_clears_throttle() {
        let (monitor, _value) = scripted(60.0, 10);
        monitor.sample_now();
        assert!(monitor.is_throttled());
        monitor.set_limits(75.0, 100);
        monitor.sample_now();
        assert!(!monitor.is_throttled());
        assert_eq!(monitor.limits(), (75.0, 100));
    }

    #[test]
    fn test_start_stop_repeatedly() {
        let (monitor, _value) = scripted(10.0, 10);
        for _ in 0..5 {
            monitor.start().unwrap();
            monitor.start().unwrap();
            assert!(monitor.is_running());
            monitor.stop();
            assert!(!monitor.is_running());
        }
        monitor.stop();
        assert!(monitor.cycles() >= 5);
    }

    #[test]
    fn test_stop_wakes_immediately() {
        let config = MonitorConfig {
            interval: Duration::from_secs(60),
            ..MonitorConfig::default()
        };
        let sample = Arc::new(Mutex::new(ResourceSample::default()));
        let monitor = ResourceMonitor::with_sampler(config, Box::new(Scripted(sample)));
        monitor.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let started = std::time::Instant::now();
        monitor.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
