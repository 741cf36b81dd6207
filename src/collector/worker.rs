//! One thread per input device.
//!
//! A worker owns its source and its decoder. It classifies each completed
//! line and passes it on without waiting: when the channel is full the line
//! is dropped and counted.

use super::{CollectorError, KeySource, SourceEvent};
use crate::collector::types::SensorEvent;
use crate::decode::KeystrokeDecoder;
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

pub struct DeviceWorker {
    device_id: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the thread exits
    done: Receiver<()>,
}

impl DeviceWorker {
    pub fn spawn(
        mut source: Box<dyn KeySource>,
        sender: Sender<SensorEvent>,
        stats: SharedStats,
    ) -> Self {
        let device_id = source.device_id().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = bounded::<()>(0);

        let thread_stop = stop.clone();
        let thread_device = device_id.clone();
        let handle = thread::spawn(move || {
            let _done = done_tx;
            run_device(source.as_mut(), &thread_device, &sender, &stats, &thread_stop);
        });

        Self {
            device_id,
            stop,
            handle: Some(handle),
            done,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(crossbeam_channel::TryRecvError::Disconnected))
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and wait up to `grace` for the thread to exit. A thread still
    /// blocked on its device after that is left detached. Returns whether it
    /// was joined.
    pub fn stop(mut self, grace: Duration) -> bool {
        self.request_stop();
        match self.done.recv_timeout(grace) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!(device_id = %self.device_id, "device worker panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(device_id = %self.device_id, "device worker did not stop in time, detaching");
                self.handle.take();
                false
            }
        }
    }
}

fn run_device(
    source: &mut dyn KeySource,
    device_id: &str,
    sender: &Sender<SensorEvent>,
    stats: &SharedStats,
    stop: &AtomicBool,
) {
    let mut decoder = KeystrokeDecoder::new();
    info!(device_id, "device worker started");

    while !stop.load(Ordering::SeqCst) {
        let event = match source.next_event() {
            Ok(SourceEvent::Key(event)) => event,
            Ok(SourceEvent::Idle) => continue,
            Ok(SourceEvent::Closed) => {
                info!(device_id, "input closed");
                break;
            }
            Err(e) => {
                warn!(device_id, error = %e, "input device failed");
                break;
            }
        };

        let Some(line) = decoder.feed(device_id, &event) else {
            continue;
        };
        match sender.try_send(SensorEvent::classify(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.record_dropped();
                debug!(device_id, "event channel full, line dropped");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    debug!(device_id, "device worker exiting");
}

/// The set of device workers feeding one channel.
pub struct Collector {
    sender: Option<Sender<SensorEvent>>,
    receiver: Receiver<SensorEvent>,
    workers: Vec<DeviceWorker>,
    stats: SharedStats,
}

impl Collector {
    pub fn new(capacity: usize, stats: SharedStats) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender: Some(sender),
            receiver,
            workers: Vec::new(),
            stats,
        }
    }

    /// Start a worker for every source. Once started, the receiver
    /// disconnects as soon as all workers have exited.
    pub fn start(&mut self, sources: Vec<Box<dyn KeySource>>) -> Result<(), CollectorError> {
        if !self.workers.is_empty() {
            return Err(CollectorError::AlreadyRunning);
        }
        if sources.is_empty() {
            return Err(CollectorError::NoDevices);
        }
        let sender = self.sender.take().ok_or(CollectorError::AlreadyRunning)?;

        for source in sources {
            self.workers
                .push(DeviceWorker::spawn(source, sender.clone(), self.stats.clone()));
        }
        Ok(())
    }

    pub fn receiver(&self) -> &Receiver<SensorEvent> {
        &self.receiver
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.device_id().to_string()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|w| !w.is_finished())
    }

    /// Stop every worker, sharing one `grace` budget. Returns how many had
    /// to be detached.
    pub fn stop(&mut self, grace: Duration) -> usize {
        for worker in &self.workers {
            worker.request_stop();
        }

        let deadline = Instant::now() + grace;
        let mut detached = 0;
        for worker in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !worker.stop(remaining) {
                detached += 1;
            }
        }
        detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{NoopSource, ReplaySource};
    use crate::decode::LineClass;
    use crate::stats::create_shared_stats;

    /// Blocks forever, like a device that never types.
    struct Stuck;

    impl KeySource for Stuck {
        fn device_id(&self) -> &str {
            "stuck"
        }

        fn next_event(&mut self) -> Result<SourceEvent, CollectorError> {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(SourceEvent::Idle)
        }
    }

    #[test]
    fn test_worker_decodes_and_classifies() {
        let mut collector = Collector::new(16, create_shared_stats());
        collector
            .start(vec![Box::new(ReplaySource::new(
                "event3",
                "WWW.PCSENSOR.COM\n29.54[C]39.58[%RH]1S\n",
            ))])
            .unwrap();

        let events: Vec<SensorEvent> = collector.receiver().iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].class, LineClass::Banner(_)));
        assert_eq!(events[1].class.reading().unwrap().interval_seconds, 1);
        assert_eq!(events[1].device_id, "event3");
    }

    #[test]
    fn test_full_channel_drops_lines() {
        let stats = create_shared_stats();
        let mut collector = Collector::new(1, stats.clone());
        collector
            .start(vec![Box::new(ReplaySource::new(
                "event3",
                "20.00[C]40.00[%RH]1S\n21.00[C]40.00[%RH]1S\n22.00[C]40.00[%RH]1S\n",
            ))])
            .unwrap();

        while collector.is_running() {
            std::thread::sleep(Duration::from_millis(5));
        }
        let received = collector.receiver().try_iter().count();
        assert_eq!(received, 1);
        assert_eq!(stats.snapshot().dropped, 2);
    }

    #[test]
    fn test_stop_detaches_stuck_workers() {
        let mut collector = Collector::new(16, create_shared_stats());
        collector
            .start(vec![Box::new(NoopSource::new("idle")), Box::new(Stuck)])
            .unwrap();
        assert_eq!(collector.device_ids(), vec!["idle", "stuck"]);

        let detached = collector.stop(Duration::from_millis(300));
        assert_eq!(detached, 1);
    }

    #[test]
    fn test_start_requires_sources() {
        let mut collector = Collector::new(16, create_shared_stats());
        assert!(matches!(collector.start(Vec::new()), Err(CollectorError::NoDevices)));
        collector
            .start(vec![Box::new(NoopSource::new("idle"))])
            .unwrap();
        assert!(matches!(
            collector.start(vec![Box::new(NoopSource::new("idle"))]),
            Err(CollectorError::AlreadyRunning)
        ));
        collector.stop(Duration::from_secs(1));
    }
}
