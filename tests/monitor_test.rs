//! Resource monitor tests
//!
//! The process sampler is checked against the running test binary. Throttle
//! transitions use a scripted sampler so each cycle's reading is known.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tenant_admission::core::{
    EventDispatcher, MonitorConfig, MonitorEvent, ProcessSampler, ResourceMonitor, ResourceSample,
    ResourceSampler, ThrottledResource,
};

/// Replays queued samples, then repeats the last one.
struct Script {
    queue: Arc<Mutex<VecDeque<ResourceSample>>>,
    last: ResourceSample,
}

impl ResourceSampler for Script {
    fn sample(&mut self) -> ResourceSample {
        if let Some(next) = self.queue.lock().pop_front() {
            self.last = next;
        }
        self.last
    }
}

fn reading(cpu_percent: f64, memory_mb: u64) -> ResourceSample {
    ResourceSample {
        cpu_percent,
        memory_mb,
    }
}

fn scripted(config: MonitorConfig) -> (ResourceMonitor, Arc<Mutex<VecDeque<ResourceSample>>>) {
    let queue = Arc::new(Mutex::new(VecDeque::new()));
    let sampler = Script {
        queue: Arc::clone(&queue),
        last: ResourceSample::default(),
    };
    (ResourceMonitor::with_sampler(config, Box::new(sampler)), queue)
}

fn limits(cpu: f64, memory: u64) -> MonitorConfig {
    MonitorConfig {
        max_cpu_percent: cpu,
        max_memory_mb: memory,
        interval: Duration::from_millis(10),
        ..MonitorConfig::default()
    }
}

#[test]
fn test_process_sampler_reads_this_process() {
    let mut sampler = ProcessSampler::new();
    let sample = sampler.sample();
    assert!(sample.memory_mb > 0);
    assert!(sample.cpu_percent.is_finite());
    assert!(sample.cpu_percent >= 0.0);
}

#[test]
fn test_start_stop_can_repeat() {
    let monitor = ResourceMonitor::new(limits(100.0, u64::MAX));
    for _ in 0..3 {
        let before = monitor.cycles();
        monitor.start().unwrap();
        monitor.start().unwrap();
        assert!(monitor.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.cycles() < before + 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(monitor.cycles() >= before + 2);
    }
    monitor.stop();
    assert!(monitor.current_memory_mb() > 0);
}

#[test]
fn test_stop_returns_without_waiting_for_interval() {
    let config = MonitorConfig {
        interval: Duration::from_secs(60),
        ..MonitorConfig::default()
    };
    let (monitor, _queue) = scripted(config);
    monitor.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    monitor.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_transitions_are_edge_triggered() {
    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
    let dispatcher = EventDispatcher::spawn("monitor-test", 16, move |event: MonitorEvent| {
        let _ = seen_tx.send(event);
    })
    .unwrap();
    let (monitor, queue) = scripted(limits(50.0, 1_000));
    let monitor = monitor.with_dispatcher(dispatcher);

    queue.lock().extend([
        reading(10.0, 100),
        reading(60.0, 100),
        reading(70.0, 100),
        reading(70.0, 2_000),
        reading(10.0, 100),
        reading(10.0, 100),
    ]);
    for _ in 0..6 {
        monitor.sample_now();
    }
    drop(monitor);

    let events: Vec<_> = seen_rx.iter().collect();
    assert_eq!(
        events,
        vec![
            MonitorEvent::Throttled(ThrottledResource::Cpu),
            MonitorEvent::Unthrottled,
        ]
    );
    assert_eq!(events[1].resource(), "all");
}

#[test]
fn test_throttled_resource_follows_latest_sample() {
    let (monitor, queue) = scripted(limits(50.0, 1_000));

    queue.lock().push_back(reading(90.0, 5_000));
    monitor.sample_now();
    assert_eq!(
        monitor.throttled_resource(),
        Some(ThrottledResource::CpuAndMemory)
    );
    assert_eq!(ThrottledResource::CpuAndMemory.as_str(), "cpu,memory");

    queue.lock().push_back(reading(10.0, 5_000));
    monitor.sample_now();
    assert_eq!(monitor.throttled_resource(), Some(ThrottledResource::Memory));
    assert!(monitor.is_throttled());
}

#[test]
fn test_ceiling_is_exclusive() {
    let (monitor, queue) = scripted(limits(50.0, 1_000));
    queue.lock().push_back(reading(50.0, 1_000));
    monitor.sample_now();
    assert!(!monitor.is_throttled());
}

#[test]
fn test_disabled_resources_never_throttle() {
    let (monitor, queue) = scripted(limits(50.0, 1_000));
    monitor.set_throttling(false, true);
    queue.lock().push_back(reading(99.0, 10));
    monitor.sample_now();
    assert!(!monitor.is_throttled());

    monitor.set_throttling(true, true);
    monitor.sample_now();
    assert_eq!(monitor.throttled_resource(), Some(ThrottledResource::Cpu));
}

#[test]
fn test_limit_changes_apply_on_next_cycle() {
    let (monitor, queue) = scripted(limits(50.0, 1_000));
    queue.lock().push_back(reading(70.0, 10));
    monitor.sample_now();
    assert!(monitor.is_throttled());

    monitor.set_limits(80.0, 1_000);
    assert_eq!(monitor.limits(), (80.0, 1_000));
    assert!(monitor.is_throttled());
    monitor.sample_now();
    assert!(!monitor.is_throttled());

    let metrics = monitor.metrics();
    assert!((metrics.cpu_percent - 70.0).abs() < f64::EPSILON);
    assert_eq!(metrics.memory_mb, 10);
    assert!(!metrics.throttled);
}
