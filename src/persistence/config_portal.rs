//! # Configuration Portal
//!
//! Shared, in-memory view of the configuration document. The UI thread, the
//! orchestrator and the autosave task all read and write through here; the
//! file layer only converts between [`ConfigDocument`] and the portal.
//!
//! Each section sits behind its own `Arc<RwLock<T>>` so an OSC retarget never
//! waits on a filter update. Access goes through [`ConfigPortal::execute_portal_action`],
//! which wraps every lock in the `try_lock!` retry (5 attempts, 10ms apart)
//! and reports [`Error::LockTimeout`] instead of blocking forever.
//!
//! Device aliases are not a section here: they live in the shared
//! [`AliasRegistry`], which has its own mutex and is folded into the document
//! on save.

use super::alias_registry::AliasRegistry;
use super::{ConfigDocument, HandAssignment};
use crate::pipeline::filters::{FilterFlag, FilterSnapshot};
use crate::tracking::frame::HandSide;
use crate::try_lock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Destination and pacing of the OSC output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub osc_ip: String,
    pub osc_port: u16,
    /// Consumer tick yields instead of sleeping when idle
    pub low_latency_mode: bool,
}

#[derive(Debug, Default)]
pub struct ConfigPortal {
    /// OSC target and low latency flag
    pub transport: Arc<RwLock<TransportConfig>>,

    /// Default hand assignment per serial
    pub hand_assignments: Arc<RwLock<BTreeMap<String, HandAssignment>>>,

    /// Persisted values of the 14 output filters
    pub filters: Arc<RwLock<FilterSnapshot>>,

    /// Serial to alias mapping, shared with the data processor
    pub aliases: Arc<AliasRegistry>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let doc = ConfigDocument::default();
        Self {
            osc_ip: doc.osc_ip,
            osc_port: doc.osc_port,
            low_latency_mode: doc.low_latency_mode,
        }
    }
}

impl ConfigPortal {
    /// Builds the portal from a loaded document. Invalid aliases are skipped.
    pub fn from_document(doc: ConfigDocument) -> Self {
        let aliases = Arc::new(AliasRegistry::new());
        if let Err(e) = aliases.load_from_json(&Value::Object(doc.device_aliases)) {
            warn!("Ignoring device aliases: {}", e);
        }

        // NONE entries carry no information, drop them on the way in
        let hand_assignments = doc
            .hand_assignments
            .into_iter()
            .filter(|(_, assignment)| *assignment != HandAssignment::None)
            .collect();

        Self {
            transport: Arc::new(RwLock::new(TransportConfig {
                osc_ip: doc.osc_ip,
                osc_port: doc.osc_port,
                low_latency_mode: doc.low_latency_mode,
            })),
            hand_assignments: Arc::new(RwLock::new(hand_assignments)),
            filters: Arc::new(RwLock::new(doc.boolean_settings)),
            aliases,
        }
    }

    /// Collects every section into a document for saving.
    pub fn to_document(&self) -> ConfigDocument {
        let transport = self.transport_config();
        ConfigDocument {
            osc_ip: transport.osc_ip,
            osc_port: transport.osc_port,
            low_latency_mode: transport.low_latency_mode,
            hand_assignments: self.hand_assignments(),
            device_aliases: match self.aliases.to_json() {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
            boolean_settings: self.filter_settings(),
        }
    }

    pub fn aliases(&self) -> Arc<AliasRegistry> {
        self.aliases.clone()
    }

    /// Executes one configuration operation with bounded lock retry.
    ///
    /// ```rust,ignore
    /// match portal.execute_portal_action(PortalAction::GetTransportConfig) {
    ///     ConfigResult::TransportConfig(config) => { /* use config */ }
    ///     ConfigResult::Failed(e) => { /* lock timeout */ }
    ///     _ => unreachable!(),
    /// }
    /// ```
    pub fn execute_portal_action(&self, action: PortalAction) -> ConfigResult {
        debug!("Portal action: {:?}", action);
        let result = match action {
            PortalAction::GetTransportConfig => {
                try_lock!(@read_lock_retry, self.transport, |guard: &TransportConfig| {
                    ConfigResult::TransportConfig(guard.clone())
                })
            }
            PortalAction::WriteOscTarget(ip, port) if ip.trim().is_empty() || port == 0 => Err(
                Error::InvalidOperation(format!("invalid OSC target {:?}:{}", ip, port)),
            ),
            PortalAction::WriteOscTarget(ip, port) => {
                try_lock!(@write_lock_retry, self.transport, |guard: &mut TransportConfig| {
                    guard.osc_ip = ip;
                    guard.osc_port = port;
                })
            }
            PortalAction::WriteLowLatencyMode(enabled) => {
                try_lock!(@write_lock_retry, self.transport, |guard: &mut TransportConfig| {
                    guard.low_latency_mode = enabled;
                })
            }
            PortalAction::GetHandAssignment(serial) => {
                try_lock!(@read_lock_retry, self.hand_assignments, |guard: &BTreeMap<String, HandAssignment>| {
                    ConfigResult::HandAssignment(guard.get(&serial).and_then(HandAssignment::side))
                })
            }
            PortalAction::GetHandAssignments => {
                try_lock!(@read_lock_retry, self.hand_assignments, |guard: &BTreeMap<String, HandAssignment>| {
                    ConfigResult::HandAssignments(guard.clone())
                })
            }
            PortalAction::WriteHandAssignment(serial, side) => {
                try_lock!(@write_lock_retry, self.hand_assignments, |guard: &mut BTreeMap<String, HandAssignment>| {
                    match side {
                        Some(side) => {
                            guard.insert(serial, HandAssignment::from(side));
                        }
                        None => {
                            guard.remove(&serial);
                        }
                    }
                })
            }
            PortalAction::GetFilterSettings => {
                try_lock!(@read_lock_retry, self.filters, |guard: &FilterSnapshot| {
                    ConfigResult::FilterSettings(*guard)
                })
            }
            PortalAction::WriteFilterSettings(snapshot) => {
                try_lock!(@write_lock_retry, self.filters, |guard: &mut FilterSnapshot| {
                    *guard = snapshot;
                })
            }
            PortalAction::WriteFilterFlag(flag, enabled) => {
                try_lock!(@write_lock_retry, self.filters, |guard: &mut FilterSnapshot| {
                    guard.set(flag, enabled);
                })
            }
        };

        result.unwrap_or_else(ConfigResult::Failed)
    }

    pub fn transport_config(&self) -> TransportConfig {
        match self.execute_portal_action(PortalAction::GetTransportConfig) {
            ConfigResult::TransportConfig(config) => config,
            other => {
                warn!("Could not read transport config: {}", other.describe());
                TransportConfig::default()
            }
        }
    }

    pub fn default_hand_assignment(&self, serial: &str) -> Option<HandSide> {
        match self.execute_portal_action(PortalAction::GetHandAssignment(serial.to_string())) {
            ConfigResult::HandAssignment(side) => side,
            other => {
                warn!(
                    "Could not read hand assignment for {}: {}",
                    serial,
                    other.describe()
                );
                None
            }
        }
    }

    pub fn hand_assignments(&self) -> BTreeMap<String, HandAssignment> {
        match self.execute_portal_action(PortalAction::GetHandAssignments) {
            ConfigResult::HandAssignments(map) => map,
            other => {
                warn!("Could not read hand assignments: {}", other.describe());
                BTreeMap::new()
            }
        }
    }

    pub fn filter_settings(&self) -> FilterSnapshot {
        match self.execute_portal_action(PortalAction::GetFilterSettings) {
            ConfigResult::FilterSettings(snapshot) => snapshot,
            other => {
                warn!("Could not read filter settings: {}", other.describe());
                FilterSnapshot::default()
            }
        }
    }
}

/// Every operation the portal supports.
///
/// `Get*` actions return cloned data, `Write*` actions take owned data.
#[derive(Debug)]
pub enum PortalAction {
    GetTransportConfig,
    WriteOscTarget(String, u16),
    WriteLowLatencyMode(bool),

    GetHandAssignment(String),
    GetHandAssignments,
    /// `None` erases the serial's entry
    WriteHandAssignment(String, Option<HandSide>),

    GetFilterSettings,
    WriteFilterSettings(FilterSnapshot),
    WriteFilterFlag(FilterFlag, bool),
}

#[derive(Debug)]
pub enum ConfigResult {
    Success,
    TransportConfig(TransportConfig),
    HandAssignment(Option<HandSide>),
    HandAssignments(BTreeMap<String, HandAssignment>),
    FilterSettings(FilterSnapshot),
    Failed(Error),
}

impl ConfigResult {
    pub fn into_result(self) -> Result<ConfigResult, Error> {
        match self {
            ConfigResult::Failed(e) => Err(e),
            other => Ok(other),
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfigResult::Failed(e) => e.to_string(),
            other => format!("unexpected result {:?}", other),
        }
    }
}

/// Lock retry for portal sections.
///
/// Tries the lock up to 5 times, 10ms apart, and yields
/// `Err(Error::LockTimeout)` when it stays contended. Write operations return
/// `ConfigResult::Success`; read operations return whatever the closure builds.
#[macro_export]
macro_rules! try_lock {
    (@write_lock_retry, $accessor:expr, $operation:expr) => {{
        let mut attempts = 0;
        const MAX_ATTEMPTS: usize = 5;

        loop {
            match $accessor.try_write() {
                Ok(mut guard) => {
                    $operation(&mut *guard);
                    break Ok($crate::persistence::config_portal::ConfigResult::Success);
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Write lock blocked: {} (attempt {}/{})",
                        e,
                        attempts,
                        MAX_ATTEMPTS
                    );

                    if attempts >= MAX_ATTEMPTS {
                        break Err($crate::persistence::config_portal::Error::LockTimeout);
                    }

                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }};

    (@read_lock_retry, $accessor:expr, $operation:expr) => {{
        let mut attempts = 0;
        const MAX_ATTEMPTS: usize = 5;

        loop {
            match $accessor.try_read() {
                Ok(guard) => {
                    let result = $operation(&*guard);
                    break Ok(result);
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Read lock blocked: {} (attempt {}/{})",
                        e,
                        attempts,
                        MAX_ATTEMPTS
                    );

                    if attempts >= MAX_ATTEMPTS {
                        break Err($crate::persistence::config_portal::Error::LockTimeout);
                    }

                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }};
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Could not acquire lock after maximum retry attempts")]
    LockTimeout,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> ConfigDocument {
        serde_json::from_value(json!({
            "osc_ip": "10.0.0.5",
            "osc_port": 9100,
            "low_latency_mode": true,
            "hand_assignments": { "SN1": "left", "SN2": "NONE" },
            "device_aliases": { "SN1": "dev3", "SN9": "bogus" },
            "booleanSettings": { "sendPalmNormal": true }
        }))
        .unwrap()
    }

    #[test]
    fn portal_exposes_document_values() {
        let portal = ConfigPortal::from_document(sample_document());

        let transport = portal.transport_config();
        assert_eq!(transport.osc_ip, "10.0.0.5");
        assert_eq!(transport.osc_port, 9100);
        assert!(transport.low_latency_mode);

        assert_eq!(portal.default_hand_assignment("SN1"), Some(HandSide::Left));
        assert_eq!(portal.default_hand_assignment("SN2"), None);
        assert_eq!(portal.hand_assignments().len(), 1);
        assert_eq!(portal.aliases().alias_for("SN1").unwrap().as_str(), "dev3");
        assert!(portal.aliases().alias_for("SN9").is_none());
        assert!(portal.filter_settings().send_palm_normal);
    }

    #[test]
    fn write_actions_update_sections() {
        let portal = ConfigPortal::from_document(ConfigDocument::default());

        assert!(matches!(
            portal.execute_portal_action(PortalAction::WriteOscTarget("192.168.1.20".into(), 7000)),
            ConfigResult::Success
        ));
        portal.execute_portal_action(PortalAction::WriteHandAssignment(
            "SN7".into(),
            Some(HandSide::Right),
        ));
        portal.execute_portal_action(PortalAction::WriteFilterFlag(FilterFlag::Palm, false));

        let doc = portal.to_document();
        assert_eq!(doc.osc_ip, "192.168.1.20");
        assert_eq!(doc.osc_port, 7000);
        assert_eq!(doc.hand_assignments["SN7"], HandAssignment::Right);
        assert!(!doc.boolean_settings.send_palm);

        portal.execute_portal_action(PortalAction::WriteHandAssignment("SN7".into(), None));
        assert!(portal.hand_assignments().is_empty());
    }

    #[test]
    fn invalid_osc_target_is_rejected() {
        let portal = ConfigPortal::from_document(ConfigDocument::default());
        assert!(matches!(
            portal.execute_portal_action(PortalAction::WriteOscTarget(" ".into(), 9000)),
            ConfigResult::Failed(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            portal.execute_portal_action(PortalAction::WriteOscTarget("127.0.0.1".into(), 0)),
            ConfigResult::Failed(Error::InvalidOperation(_))
        ));
        assert_eq!(portal.transport_config(), TransportConfig::default());
    }

    #[test]
    fn contended_write_times_out_instead_of_blocking() {
        let portal = ConfigPortal::from_document(ConfigDocument::default());
        let held = portal.transport.clone();
        let _guard = held.try_read().unwrap();

        let result = portal.execute_portal_action(PortalAction::WriteLowLatencyMode(true));
        assert!(matches!(result, ConfigResult::Failed(Error::LockTimeout)));
    }

    #[test]
    fn document_round_trips_through_portal() {
        let portal = ConfigPortal::from_document(sample_document());
        let doc = portal.to_document();
        let again = ConfigPortal::from_document(doc.clone()).to_document();
        assert_eq!(doc, again);
        assert_eq!(doc.device_aliases.get("SN1"), Some(&json!("dev3")));
    }
}
