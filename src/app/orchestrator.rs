//! Orchestrator - composition root and control surface of the pipeline
//!
//! Builds every stage, wires them together once and exposes the operations a
//! UI or CLI needs: start/stop, draining queued frames, hand assignment,
//! filter toggles and OSC retargeting.
//!
//! ```text
//! TrackingEventSource ─► LeapPoller ─[FrameQueue]─► process_pending_frames()
//!                            │                             │
//!                 PipelineDeviceEvents              HandSorter ─► DataProcessor ─► TransportSink
//!                 (alias, default hand,                                 │
//!                  status board)                               status board, observer
//! ```

use super::device_status::{DeviceStatus, DeviceStatusBoard};
use crate::persistence::alias_registry::{AliasRegistry, AssignedHand, DeviceAlias};
use crate::persistence::config_portal::{self, ConfigPortal, PortalAction};
use crate::pipeline::data_processor::{DataProcessor, FrameObserver};
use crate::pipeline::filters::{FilterFlag, FilterSnapshot, UnknownFilterFlag};
use crate::pipeline::hand_sorter::HandSorter;
use crate::tracking::device_registry::{DeviceListener, DeviceRecord};
use crate::tracking::event_source::TrackingEventSource;
use crate::tracking::frame::{Frame, HandSide};
use crate::tracking::frame_queue::{self, FrameConsumer, QueueError, DEFAULT_QUEUE_CAPACITY};
use crate::tracking::poller::{LeapPoller, PollerError, PollerHandle, PollerSettings, PollerStats};
use crate::transport::TransportSink;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sizing of the producer side.
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Frames buffered between the polling thread and the consumer tick
    pub queue_capacity: usize,

    pub poller: PollerSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poller: PollerSettings::default(),
        }
    }
}

/// Errors surfaced by the control surface
///
/// Only setup and configuration paths fail; frame processing never does.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Frame queue error: {0}")]
    QueueError(#[from] QueueError),

    /// Connecting to the tracking service or spawning the polling thread failed
    #[error("Poller error: {0}")]
    PollerError(#[from] PollerError),

    /// The configuration portal rejected or timed out on a write
    #[error("Config error: {0}")]
    ConfigError(#[from] config_portal::Error),

    #[error(transparent)]
    FilterError(#[from] UnknownFilterFlag),

    #[error("Pipeline is already running")]
    AlreadyRunning,
}

/// Device lifecycle handling, called on the polling thread.
struct PipelineDeviceEvents {
    portal: Arc<ConfigPortal>,
    aliases: Arc<AliasRegistry>,
    sorter: Arc<HandSorter>,
    status: Arc<DeviceStatusBoard>,
}

impl DeviceListener for PipelineDeviceEvents {
    fn device_connected(&self, record: &DeviceRecord) {
        let alias = self.aliases.get_or_assign_alias(&record.serial);
        info!(
            "Device {} connected as {}{}",
            record.serial,
            alias,
            if record.subscribed { "" } else { " (not subscribed)" }
        );

        if let Some(side) = self.portal.default_hand_assignment(&record.serial) {
            info!(
                "Applying default {} hand assignment to {}",
                side, record.serial
            );
            self.sorter.set_device_hand(&record.serial, Some(side));
            self.aliases
                .set_assigned_hand(&alias, AssignedHand::from(Some(side)));
        }

        self.status.mark_connected(
            &record.serial,
            alias.as_str(),
            self.sorter.device_hand(&record.serial),
        );
    }

    fn device_lost(&self, serial: &str) {
        info!("Device {} lost", serial);
        self.status.mark_lost(serial);
    }

    fn service_connected(&self) {
        info!("Tracking service connected");
    }

    fn service_lost(&self) {
        warn!("Tracking service connection lost");
    }
}

/// Owns the pipeline stages and the polling thread
///
/// All methods take `&self`; the orchestrator is meant to be shared behind an
/// `Arc` between the consumer tick and whatever issues commands.
///
/// # Threading
///
/// - The polling thread owns the event source and the device registry.
/// - [`process_pending_frames`](Self::process_pending_frames) runs the whole
///   consumer side synchronously on the calling thread.
/// - Command methods may be called from any thread.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    portal: Arc<ConfigPortal>,
    aliases: Arc<AliasRegistry>,
    sink: Arc<dyn TransportSink>,
    sorter: Arc<HandSorter>,
    processor: Arc<DataProcessor>,
    status: Arc<DeviceStatusBoard>,
    observer: Arc<RwLock<Option<FrameObserver>>>,
    consumer: Mutex<Option<FrameConsumer>>,
    poller: Mutex<Option<PollerHandle>>,
}

impl Orchestrator {
    /// Builds and wires the consumer side. Nothing runs until [`start`](Self::start).
    pub fn new(
        portal: Arc<ConfigPortal>,
        sink: Arc<dyn TransportSink>,
        settings: Option<OrchestratorSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        let aliases = portal.aliases();
        let processor = Arc::new(DataProcessor::new(
            aliases.clone(),
            sink.clone(),
            &portal.filter_settings(),
        ));

        let orchestrator = Self {
            settings,
            portal,
            aliases,
            sink,
            sorter: Arc::new(HandSorter::new()),
            processor,
            status: Arc::new(DeviceStatusBoard::new()),
            observer: Arc::new(RwLock::new(None)),
            consumer: Mutex::new(None),
            poller: Mutex::new(None),
        };
        orchestrator.wire();
        orchestrator
    }

    fn wire(&self) {
        let processor = self.processor.clone();
        self.sorter.connect(Box::new(move |serial, frame| {
            processor.process_data(serial, &frame);
        }));

        let status = self.status.clone();
        let observer = self.observer.clone();
        self.processor
            .set_observer(Box::new(move |serial, alias, frame| {
                status.record_frame(serial, alias.as_str(), frame.hands.len());
                if let Some(observer) = &*observer.read() {
                    observer(serial, alias, frame);
                }
            }));
        debug!("Pipeline stages wired");
    }

    /// Connects to `source`, opens its devices and spawns the polling thread.
    pub fn start(&self, source: Box<dyn TrackingEventSource>) -> Result<(), OrchestratorError> {
        let mut poller_slot = self.poller.lock();
        if poller_slot.as_ref().is_some_and(PollerHandle::is_running) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let (producer, consumer) = frame_queue::bounded(self.settings.queue_capacity)?;
        let mut poller = LeapPoller::create(source, producer, Some(self.settings.poller.clone()));
        poller.set_device_listener(Arc::new(PipelineDeviceEvents {
            portal: self.portal.clone(),
            aliases: self.aliases.clone(),
            sorter: self.sorter.clone(),
            status: self.status.clone(),
        }));
        let poller = poller.connect()?;

        *self.consumer.lock() = Some(consumer);
        *poller_slot = Some(PollerHandle::spawn(poller)?);
        info!("Pipeline started");
        Ok(())
    }

    /// Stops and joins the polling thread. Frames still queued are discarded.
    pub fn stop(&self) -> Result<(), OrchestratorError> {
        let Some(mut handle) = self.poller.lock().take() else {
            debug!("Stop requested, pipeline not running");
            return Ok(());
        };
        handle.stop()?;

        if let Some(consumer) = self.consumer.lock().take() {
            if !consumer.is_empty() {
                debug!("Discarding {} queued frame(s)", consumer.len());
            }
        }
        info!("Pipeline stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(PollerHandle::is_running)
    }

    /// Drains the frame queue through the sorter and processor.
    ///
    /// Returns the number of frames handled. Call this often enough to keep
    /// the queue from filling up.
    pub fn process_pending_frames(&self) -> usize {
        let mut consumer = self.consumer.lock();
        let Some(consumer) = consumer.as_mut() else {
            return 0;
        };

        let mut processed = 0;
        while let Some(frame) = consumer.try_pop() {
            let serial = frame.device_id.clone();
            self.sorter.process_frame(&serial, frame);
            processed += 1;
        }
        processed
    }

    /// Feeds a frame straight into the sorter, bypassing the queue.
    pub fn emit_test_frame(&self, serial: &str, frame: Frame) {
        debug!("Emitting test frame for {}", serial);
        self.sorter.process_frame(serial, frame);
    }

    /// Restricts `serial` to one hand (`None` for both) and persists the choice.
    pub fn set_device_hand(
        &self,
        serial: &str,
        hand: Option<HandSide>,
    ) -> Result<(), OrchestratorError> {
        self.sorter.set_device_hand(serial, hand);
        let alias = self.aliases.get_or_assign_alias(serial);
        self.aliases
            .set_assigned_hand(&alias, AssignedHand::from(hand));
        self.status.set_assigned_hand(serial, hand);

        self.portal
            .execute_portal_action(PortalAction::WriteHandAssignment(serial.to_string(), hand))
            .into_result()?;
        Ok(())
    }

    pub fn device_hand(&self, serial: &str) -> Option<HandSide> {
        self.sorter.device_hand(serial)
    }

    /// Toggles one filter by its config key ("sendPalm") or bare name ("palm").
    pub fn set_filter_flag(&self, name: &str, enabled: bool) -> Result<(), OrchestratorError> {
        let flag: FilterFlag = name.parse()?;
        self.processor.set_filter_flag(flag, enabled);
        self.portal
            .execute_portal_action(PortalAction::WriteFilterFlag(flag, enabled))
            .into_result()?;
        Ok(())
    }

    pub fn set_filter_settings(&self, snapshot: &FilterSnapshot) -> Result<(), OrchestratorError> {
        self.processor.set_filter_settings(snapshot);
        self.portal
            .execute_portal_action(PortalAction::WriteFilterSettings(*snapshot))
            .into_result()?;
        Ok(())
    }

    pub fn filter_settings(&self) -> FilterSnapshot {
        self.processor.filter_settings()
    }

    /// Validates and persists the target, then retargets the live sink.
    pub fn set_osc_target(&self, host: &str, port: u16) -> Result<(), OrchestratorError> {
        self.portal
            .execute_portal_action(PortalAction::WriteOscTarget(host.to_string(), port))
            .into_result()?;
        self.sink.update_target(host, port);
        info!("OSC target set to {}:{}", host, port);
        Ok(())
    }

    pub fn set_low_latency_mode(&self, enabled: bool) -> Result<(), OrchestratorError> {
        self.portal
            .execute_portal_action(PortalAction::WriteLowLatencyMode(enabled))
            .into_result()?;
        Ok(())
    }

    pub fn low_latency_mode(&self) -> bool {
        self.portal.transport_config().low_latency_mode
    }

    /// Enables or mutes OSC output. Muted frames still update status and observer.
    pub fn set_osc_enabled(&self, enabled: bool) {
        self.processor.set_output_enabled(enabled);
        info!("OSC output {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn osc_enabled(&self) -> bool {
        self.processor.output_enabled()
    }

    /// Alias used in addresses for `serial`, assigned on first use.
    pub fn alias_for_serial(&self, serial: &str) -> DeviceAlias {
        self.aliases.get_or_assign_alias(serial)
    }

    pub fn set_frame_observer(&self, observer: FrameObserver) {
        *self.observer.write() = Some(observer);
    }

    pub fn connected_serials(&self) -> Vec<String> {
        self.status.connected_serials()
    }

    pub fn device_status(&self, serial: &str) -> Option<DeviceStatus> {
        self.status.device_status(serial)
    }

    pub fn poller_stats(&self) -> Option<Arc<PollerStats>> {
        self.poller
            .lock()
            .as_ref()
            .map(|handle| handle.stats().clone())
    }

    pub fn portal(&self) -> &Arc<ConfigPortal> {
        &self.portal
    }

    /// Closes the transport. Call after [`stop`](Self::stop) on shutdown.
    pub fn close_transport(&self) {
        self.sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ConfigDocument;
    use crate::tracking::frame::{Hand, Vector3};
    use crate::tracking::simulated::{raw_hand_at, ScriptedDevice, ScriptedSource};
    use crate::transport::recording::RecordingSink;
    use std::time::{Duration, Instant};

    fn orchestrator(doc: ConfigDocument) -> (Orchestrator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let portal = Arc::new(ConfigPortal::from_document(doc));
        (Orchestrator::new(portal, sink.clone(), None), sink)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_frame_flows_to_sink() {
        let (orchestrator, sink) = orchestrator(ConfigDocument::default());
        let mut hand = Hand::new(HandSide::Left);
        hand.palm.position = Vector3::new(0.0, 450.0, 0.0);

        orchestrator.emit_test_frame("SN1", Frame::new("SN1", 1, vec![hand]));

        assert_eq!(sink.last_value("/leap/dev1/left/palm/ty"), Some(450.0));
        assert_eq!(orchestrator.device_status("SN1").unwrap().frame_count, 1);
    }

    #[test]
    fn hand_assignment_reaches_sorter_and_config() {
        let (orchestrator, sink) = orchestrator(ConfigDocument::default());
        orchestrator
            .set_device_hand("SN1", Some(HandSide::Right))
            .unwrap();

        let frame = Frame::new(
            "SN1",
            1,
            vec![Hand::new(HandSide::Left), Hand::new(HandSide::Right)],
        );
        orchestrator.emit_test_frame("SN1", frame);

        assert!(!sink.addresses().is_empty());
        assert!(sink.addresses().iter().all(|a| a.contains("/right/")));
        assert_eq!(
            orchestrator.portal().default_hand_assignment("SN1"),
            Some(HandSide::Right)
        );

        orchestrator.set_device_hand("SN1", None).unwrap();
        assert_eq!(orchestrator.portal().default_hand_assignment("SN1"), None);
        assert_eq!(orchestrator.device_hand("SN1"), None);
    }

    #[test]
    fn filter_flag_by_name_updates_processor_and_config() {
        let (orchestrator, _) = orchestrator(ConfigDocument::default());
        orchestrator.set_filter_flag("sendPalmNormal", true).unwrap();
        orchestrator.set_filter_flag("wrist", false).unwrap();

        assert!(orchestrator.filter_settings().get(FilterFlag::PalmNormal));
        assert!(!orchestrator.portal().filter_settings().get(FilterFlag::Wrist));
        assert!(matches!(
            orchestrator.set_filter_flag("sendElbow", true),
            Err(OrchestratorError::FilterError(_))
        ));
    }

    #[test]
    fn osc_target_is_validated_before_retargeting() {
        let (orchestrator, sink) = orchestrator(ConfigDocument::default());
        orchestrator.set_osc_target("192.168.1.20", 9001).unwrap();
        assert_eq!(sink.target(), Some(("192.168.1.20".to_string(), 9001)));
        assert_eq!(orchestrator.portal().transport_config().osc_port, 9001);

        assert!(orchestrator.set_osc_target("", 9002).is_err());
        assert_eq!(sink.target(), Some(("192.168.1.20".to_string(), 9001)));
    }

    #[test]
    fn muted_output_sends_nothing() {
        let (orchestrator, sink) = orchestrator(ConfigDocument::default());
        orchestrator.set_osc_enabled(false);
        orchestrator.emit_test_frame("SN1", Frame::new("SN1", 1, vec![Hand::new(HandSide::Left)]));
        assert!(sink.is_empty());
        assert_eq!(orchestrator.device_status("SN1").unwrap().last_hand_count, 1);
    }

    #[test]
    fn start_drain_stop_with_scripted_source() {
        let mut doc = ConfigDocument::default();
        doc.hand_assignments.insert(
            "SN1".to_string(),
            crate::persistence::HandAssignment::Left,
        );
        let (orchestrator, sink) = orchestrator(doc);

        let source = ScriptedSource::new().with_device(ScriptedDevice::new(1, "SN1"));
        let feed = source.feed();
        orchestrator.start(Box::new(source)).unwrap();
        assert!(orchestrator.is_running());
        assert_eq!(orchestrator.connected_serials(), vec!["SN1".to_string()]);
        assert_eq!(orchestrator.device_hand("SN1"), Some(HandSide::Left));

        feed.push_tracking(
            1,
            10,
            vec![
                raw_hand_at(HandSide::Left, Vector3::new(0.0, 300.0, 0.0)),
                raw_hand_at(HandSide::Right, Vector3::new(0.0, 300.0, 0.0)),
            ],
        );
        let mut processed = 0;
        assert!(wait_for(|| {
            processed += orchestrator.process_pending_frames();
            processed > 0
        }));
        assert_eq!(sink.last_value("/leap/dev1/left/palm/ty"), Some(300.0));
        assert!(sink.addresses().iter().all(|a| !a.contains("/right/")));

        assert!(matches!(
            orchestrator.start(Box::new(ScriptedSource::new())),
            Err(OrchestratorError::AlreadyRunning)
        ));

        orchestrator.stop().unwrap();
        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.process_pending_frames(), 0);
    }

    #[test]
    fn failed_connection_is_reported() {
        let (orchestrator, _) = orchestrator(ConfigDocument::default());
        let result = orchestrator.start(Box::new(ScriptedSource::new().failing_connection()));
        assert!(matches!(result, Err(OrchestratorError::PollerError(_))));
        assert!(!orchestrator.is_running());
    }
}
