use super::device_registry::{DeviceListener, DeviceRegistry};
use super::event_source::{SourceError, SourceEvent, TrackingEventSource};
use super::frame_queue::FrameProducer;
use chrono::Local;
use statum::{machine, state};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// Poller settings
#[derive(Clone, Debug)]
pub struct PollerSettings {
    // How long a single poll may wait for an event
    pub poll_timeout: Duration,
    // Pause between poll calls
    pub idle_sleep: Duration,
    // Interval for the stats log line
    pub stats_interval_secs: i64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(30),
            idle_sleep: Duration::from_millis(1),
            stats_interval_secs: 10,
        }
    }
}

// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Failed to connect to tracking service: {0}")]
    ConnectionError(#[from] SourceError),

    #[error("Failed to spawn polling thread: {0}")]
    SpawnError(String),

    #[error("Polling thread panicked")]
    ThreadPanicked,
}

/// Counters shared between the polling thread and its observers.
#[derive(Debug, Default)]
pub struct PollerStats {
    pub events: AtomicU64,
    pub frames_pushed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub unknown_device_frames: AtomicU64,
}

impl PollerStats {
    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum PollerState {
    Initializing,
    Polling,
}

#[machine]
pub struct LeapPoller<S: PollerState> {
    // Tracking service the poller drives
    source: Box<dyn TrackingEventSource>,

    // Open devices, mutated only on the polling thread
    registry: DeviceRegistry,

    // Producer half of the frame queue
    producer: FrameProducer,

    settings: PollerSettings,

    stats: Arc<PollerStats>,
}

impl<S: PollerState> LeapPoller<S> {
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }
}

impl LeapPoller<Initializing> {
    pub fn create(
        source: Box<dyn TrackingEventSource>,
        producer: FrameProducer,
        settings: Option<PollerSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Creating poller with settings: {:?}", settings);

        Self::new(
            source,
            DeviceRegistry::new(),
            producer,
            settings,
            Arc::new(PollerStats::default()),
        )
    }

    /// Registers who hears about device and service lifecycle events.
    /// Must happen before [`connect`](Self::connect) so startup devices are reported.
    pub fn set_device_listener(&mut self, listener: Arc<dyn DeviceListener>) {
        self.registry.set_listener(listener);
    }

    /// Connects to the service, opens the devices visible right now and
    /// transitions to Polling.
    pub fn connect(mut self) -> Result<LeapPoller<Polling>, PollerError> {
        info!("Connecting to tracking service");
        if let Err(e) = self.source.open_connection() {
            error!("Tracking service connection failed: {}", e);
            return Err(PollerError::ConnectionError(e));
        }

        if !self.registry.initialize_devices(self.source.as_mut()) {
            warn!("No devices ready at startup, waiting for connect events");
        }

        info!(
            "Poller connected with {} device(s), transitioning to Polling state",
            self.registry.devices().len()
        );
        Ok(self.transition())
    }
}

impl LeapPoller<Polling> {
    /// Polls a single event and dispatches it.
    pub fn poll_once(&mut self) {
        let event = match self.source.poll(self.settings.poll_timeout) {
            Ok(event) => event,
            Err(e) => {
                warn!("Poll failed: {}", e);
                return;
            }
        };

        match event {
            SourceEvent::None => {}
            SourceEvent::ServiceConnected => self.registry.handle_service_connected(),
            SourceEvent::ServiceLost => self.registry.handle_service_lost(),
            SourceEvent::DeviceConnected(device) => {
                self.stats.events.fetch_add(1, Ordering::Relaxed);
                self.registry
                    .handle_device_event(self.source.as_mut(), device)
            }
            SourceEvent::DeviceLost(device) => {
                self.stats.events.fetch_add(1, Ordering::Relaxed);
                self.registry.handle_device_lost(self.source.as_mut(), device)
            }
            SourceEvent::Tracking(snapshot) => {
                self.stats.events.fetch_add(1, Ordering::Relaxed);
                let Some(serial) = self.registry.serial_for(snapshot.device_id) else {
                    debug!(
                        "Tracking event for unknown device id {}",
                        snapshot.device_id
                    );
                    self.stats
                        .unknown_device_frames
                        .fetch_add(1, Ordering::Relaxed);
                    return;
                };

                let frame = snapshot.decode(serial);
                match self.producer.try_push(frame) {
                    Ok(()) => {
                        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(dropped) => {
                        debug!(
                            "Frame queue full, dropping frame {} from {}",
                            dropped.timestamp, dropped.device_id
                        );
                        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            SourceEvent::Other(description) => debug!("Ignoring service event: {}", description),
        }
    }

    /// Runs until `running` is cleared, then releases every device.
    pub fn run_polling_loop(mut self, running: Arc<AtomicBool>) {
        info!("Starting poll loop");

        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(self.settings.stats_interval_secs);
        let mut pushed_at_last_log = 0;
        let mut dropped_at_last_log = 0;

        while running.load(Ordering::Acquire) {
            self.poll_once();

            let now = Local::now();
            if now - last_log_time > log_interval {
                let pushed = self.stats.frames_pushed();
                let dropped = self.stats.frames_dropped();
                info!(
                    "Poller stats: {} frames queued, {} dropped in last {} seconds",
                    pushed - pushed_at_last_log,
                    dropped - dropped_at_last_log,
                    log_interval.num_seconds()
                );
                pushed_at_last_log = pushed;
                dropped_at_last_log = dropped;
                last_log_time = now;
            }

            std::thread::sleep(self.settings.idle_sleep);
        }

        info!("Poll loop stopped, releasing devices");
        self.registry.cleanup(self.source.as_mut());
        self.source.close_connection();
    }
}

/// Owns the polling thread and its stop flag.
pub struct PollerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<PollerStats>,
}

impl PollerHandle {
    pub fn spawn(poller: LeapPoller<Polling>) -> Result<Self, PollerError> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = poller.stats();
        let flag = running.clone();

        let thread = std::thread::Builder::new()
            .name("leap-poller".to_string())
            .spawn(move || poller.run_polling_loop(flag))
            .map_err(|e| PollerError::SpawnError(e.to_string()))?;

        Ok(Self {
            running,
            thread: Some(thread),
            stats,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<PollerStats> {
        &self.stats
    }

    /// Signals the thread and waits for it. The current poll finishes its
    /// timeout window first.
    pub fn stop(&mut self) -> Result<(), PollerError> {
        self.running.store(false, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| PollerError::ThreadPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop poller: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::event_source::{DeviceRef, TrackingSnapshot};
    use crate::tracking::frame_queue;
    use crate::tracking::simulated::{ScriptedDevice, ScriptedSource};
    use std::time::Instant;

    fn snapshot(device_id: u32, timestamp: u64) -> SourceEvent {
        SourceEvent::Tracking(TrackingSnapshot {
            device_id,
            timestamp,
            hands: Vec::new(),
        })
    }

    #[test]
    fn connection_failure_is_fatal() {
        let (producer, _consumer) = frame_queue::bounded(4).unwrap();
        let source = ScriptedSource::new().failing_connection();
        let poller = LeapPoller::create(Box::new(source), producer, None);
        assert!(matches!(
            poller.connect(),
            Err(PollerError::ConnectionError(_))
        ));
    }

    #[test]
    fn tracking_events_are_decoded_and_queued_with_serial() {
        let (producer, mut consumer) = frame_queue::bounded(4).unwrap();
        let source = ScriptedSource::new().with_device(ScriptedDevice::new(3, "SN3"));
        let feed = source.feed();
        let mut poller = LeapPoller::create(Box::new(source), producer, None)
            .connect()
            .unwrap();

        feed.push(snapshot(3, 10));
        feed.push(snapshot(8, 11));
        poller.poll_once();
        poller.poll_once();

        let frame = consumer.try_pop().expect("frame from known device");
        assert_eq!(frame.device_id, "SN3");
        assert_eq!(frame.timestamp, 10);
        assert!(consumer.try_pop().is_none());
        assert_eq!(poller.stats().unknown_device_frames.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn full_queue_drops_frames_without_blocking() {
        let (producer, mut consumer) = frame_queue::bounded(2).unwrap();
        let source = ScriptedSource::new().with_device(ScriptedDevice::new(1, "SN1"));
        let feed = source.feed();
        let mut poller = LeapPoller::create(Box::new(source), producer, None)
            .connect()
            .unwrap();

        for ts in 0..5 {
            feed.push(snapshot(1, ts));
            poller.poll_once();
        }

        let stats = poller.stats();
        assert_eq!(stats.frames_pushed(), 2);
        assert_eq!(stats.frames_dropped(), 3);
        assert_eq!(consumer.try_pop().map(|f| f.timestamp), Some(0));
        assert_eq!(consumer.try_pop().map(|f| f.timestamp), Some(1));
    }

    #[test]
    fn handle_stop_joins_thread_and_releases_devices() {
        let (producer, mut consumer) = frame_queue::bounded(16).unwrap();
        let source = ScriptedSource::new().with_late_device(ScriptedDevice::new(2, "SN2"));
        let feed = source.feed();
        let journal = source.journal();
        let poller = LeapPoller::create(Box::new(source), producer, None)
            .connect()
            .unwrap();

        feed.push(SourceEvent::DeviceConnected(DeviceRef { id: 2 }));
        feed.push(snapshot(2, 1));
        let mut handle = PollerHandle::spawn(poller).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = None;
        while received.is_none() && Instant::now() < deadline {
            received = consumer.try_pop();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(received.map(|f| f.device_id), Some("SN2".to_string()));

        handle.stop().unwrap();
        assert!(!handle.is_running());
        let journal = journal.lock();
        assert_eq!(journal.closed.len(), 1);
        assert!(journal.connection_closed);
    }
}
