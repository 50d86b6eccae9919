//! Sensor event delegates.
//!
//! The sensing subsystem reports everything it observes as a [`SensorEvent`]
//! and hands it to a [`DelegateSet`], which calls every registered
//! [`SensorDelegate`] exactly once before returning.
//!
//! ```text
//!  subsystem ──emit(&event)──► DelegateSet ──► delegate 1 .dispatch()
//!                                         ├──► delegate 2 .dispatch()
//!                                         └──► delegate N .dispatch()
//! ```
//!
//! Delegates run synchronously on the subsystem's thread. They must not block
//! and must copy anything they want to keep.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{
    ImmediateSendData, PayloadData, Proximity, SensorState, SensorType, TargetIdentifier,
};

/// Everything the sensing subsystem can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// A target was detected.
    Detect {
        /// Detected target.
        target: TargetIdentifier,
    },
    /// Payload data was read from a target.
    PayloadRead {
        /// Payload read.
        payload: PayloadData,
        /// Source target.
        target: TargetIdentifier,
    },
    /// A target wrote immediate-send data to us.
    ImmediateSend {
        /// Data received.
        data: ImmediateSendData,
        /// Source target.
        target: TargetIdentifier,
    },
    /// A target shared payloads it collected from others.
    Shared {
        /// Shared payloads.
        payloads: Vec<PayloadData>,
        /// Sharing target.
        target: TargetIdentifier,
    },
    /// A proximity sample was measured.
    Proximity {
        /// The sample.
        proximity: Proximity,
        /// Measured target.
        target: TargetIdentifier,
    },
    /// A proximity sample together with the target's payload.
    ProximityWithPayload {
        /// The sample.
        proximity: Proximity,
        /// Measured target.
        target: TargetIdentifier,
        /// The target's payload.
        payload: PayloadData,
    },
    /// A sensor changed state.
    StateChange {
        /// New state.
        state: SensorState,
    },
}

impl SensorEvent {
    /// Short machine-readable event name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Detect { .. } => "detect",
            Self::PayloadRead { .. } => "payload_read",
            Self::ImmediateSend { .. } => "immediate_send",
            Self::Shared { .. } => "shared",
            Self::Proximity { .. } => "proximity",
            Self::ProximityWithPayload { .. } => "proximity_with_payload",
            Self::StateChange { .. } => "state_change",
        }
    }

    /// The target the event concerns, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&TargetIdentifier> {
        match self {
            Self::Detect { target }
            | Self::PayloadRead { target, .. }
            | Self::ImmediateSend { target, .. }
            | Self::Shared { target, .. }
            | Self::Proximity { target, .. }
            | Self::ProximityWithPayload { target, .. } => Some(target),
            Self::StateChange { .. } => None,
        }
    }
}

/// Observer of sensing events.
///
/// Every capability has a no-op default, so delegates override only what they
/// care about. [`dispatch`](Self::dispatch) routes a [`SensorEvent`] to the
/// matching method; delegates that want the raw event can override it instead.
pub trait SensorDelegate: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// A target was detected.
    fn on_detect(&self, _sensor: SensorType, _target: &TargetIdentifier) {}

    /// Payload data was read from a target.
    fn on_payload_read(
        &self,
        _sensor: SensorType,
        _payload: &PayloadData,
        _target: &TargetIdentifier,
    ) {
    }

    /// Immediate-send data was received from a target.
    fn on_immediate_send(
        &self,
        _sensor: SensorType,
        _data: &ImmediateSendData,
        _target: &TargetIdentifier,
    ) {
    }

    /// A target shared payloads it has collected.
    fn on_shared(&self, _sensor: SensorType, _payloads: &[PayloadData], _target: &TargetIdentifier) {}

    /// A proximity sample was measured.
    fn on_proximity(&self, _sensor: SensorType, _proximity: &Proximity, _target: &TargetIdentifier) {}

    /// A proximity sample was measured for a target whose payload is known.
    fn on_proximity_with_payload(
        &self,
        _sensor: SensorType,
        _proximity: &Proximity,
        _target: &TargetIdentifier,
        _payload: &PayloadData,
    ) {
    }

    /// A sensor changed state.
    fn on_state_change(&self, _sensor: SensorType, _state: SensorState) {}

    /// Route `event` to the matching capability.
    fn dispatch(&self, sensor: SensorType, event: &SensorEvent) {
        match event {
            SensorEvent::Detect { target } => self.on_detect(sensor, target),
            SensorEvent::PayloadRead { payload, target } => {
                self.on_payload_read(sensor, payload, target);
            }
            SensorEvent::ImmediateSend { data, target } => {
                self.on_immediate_send(sensor, data, target);
            }
            SensorEvent::Shared { payloads, target } => self.on_shared(sensor, payloads, target),
            SensorEvent::Proximity { proximity, target } => {
                self.on_proximity(sensor, proximity, target);
            }
            SensorEvent::ProximityWithPayload {
                proximity,
                target,
                payload,
            } => self.on_proximity_with_payload(sensor, proximity, target, payload),
            SensorEvent::StateChange { state } => self.on_state_change(sensor, *state),
        }
    }
}

/// Ordered list of registered delegates.
#[derive(Default, Clone)]
pub struct DelegateSet {
    delegates: Vec<Arc<dyn SensorDelegate>>,
}

impl DelegateSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delegate. Delegates are never removed.
    pub fn add(&mut self, delegate: Arc<dyn SensorDelegate>) {
        debug!(delegate = delegate.name(), "Registered sensor delegate");
        self.delegates.push(delegate);
    }

    /// Number of registered delegates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// Whether no delegates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }

    /// Deliver `event` to every delegate, once each, before returning.
    pub fn emit(&self, sensor: SensorType, event: &SensorEvent) {
        for delegate in &self.delegates {
            delegate.dispatch(sensor, event);
        }
    }
}

/// Logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDelegate;

impl SensorDelegate for LoggingDelegate {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn on_detect(&self, sensor: SensorType, target: &TargetIdentifier) {
        debug!(%sensor, %target, "sensor didDetect");
    }

    fn on_payload_read(&self, sensor: SensorType, payload: &PayloadData, target: &TargetIdentifier) {
        debug!(%sensor, %target, payload = %payload.hex_encoded(), "sensor didRead");
    }

    fn on_immediate_send(
        &self,
        sensor: SensorType,
        data: &ImmediateSendData,
        target: &TargetIdentifier,
    ) {
        debug!(%sensor, %target, data = %data.hex_encoded(), "sensor didReceive");
    }

    fn on_shared(&self, sensor: SensorType, payloads: &[PayloadData], target: &TargetIdentifier) {
        debug!(%sensor, %target, count = payloads.len(), "sensor didShare");
    }

    fn on_proximity(&self, sensor: SensorType, proximity: &Proximity, target: &TargetIdentifier) {
        debug!(%sensor, %target, value = proximity.value, "sensor didMeasure");
    }

    fn on_proximity_with_payload(
        &self,
        sensor: SensorType,
        proximity: &Proximity,
        target: &TargetIdentifier,
        payload: &PayloadData,
    ) {
        debug!(
            %sensor,
            %target,
            value = proximity.value,
            payload = %payload.hex_encoded(),
            "sensor didMeasure withPayload"
        );
    }

    fn on_state_change(&self, sensor: SensorType, state: SensorState) {
        debug!(%sensor, ?state, "sensor didUpdateState");
    }
}

/// One line of the contact log.
#[derive(Debug, Serialize)]
struct ContactRecord<'a> {
    timestamp: String,
    sensor: SensorType,
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proximity: Option<&'a Proximity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<SensorState>,
}

/// Appends every event as a JSON line to a writer.
pub struct ContactLogDelegate<W> {
    sink: Mutex<W>,
}

impl<W: Write + Send> ContactLogDelegate<W> {
    /// Log to `sink`.
    pub const fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Recover the writer.
    ///
    /// # Panics
    ///
    /// Panics if a previous write panicked while holding the lock.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(event: &SensorEvent, sensor: SensorType) -> ContactRecord<'_> {
        let (payload, proximity, state) = match event {
            SensorEvent::PayloadRead { payload, .. } => (Some(payload.hex_encoded()), None, None),
            SensorEvent::ImmediateSend { data, .. } => (Some(data.hex_encoded()), None, None),
            SensorEvent::Shared { payloads, .. } => (
                Some(
                    payloads
                        .iter()
                        .map(PayloadData::hex_encoded)
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                None,
                None,
            ),
            SensorEvent::Proximity { proximity, .. } => (None, Some(proximity), None),
            SensorEvent::ProximityWithPayload {
                proximity, payload, ..
            } => (Some(payload.hex_encoded()), Some(proximity), None),
            SensorEvent::StateChange { state } => (None, None, Some(*state)),
            SensorEvent::Detect { .. } => (None, None, None),
        };

        ContactRecord {
            timestamp: Utc::now().to_rfc3339(),
            sensor,
            event: event.kind(),
            target: event.target().map(ToString::to_string),
            payload,
            proximity,
            state,
        }
    }
}

impl<W: Write + Send> SensorDelegate for ContactLogDelegate<W> {
    fn name(&self) -> &'static str {
        "contact-log"
    }

    fn dispatch(&self, sensor: SensorType, event: &SensorEvent) {
        let record = Self::record(event, sensor);
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode contact record");
                return;
            }
        };

        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = writeln!(sink, "{line}").and_then(|()| sink.flush()) {
            warn!(error = %e, "Failed to write contact record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        detects: AtomicUsize,
        reads: AtomicUsize,
        states: AtomicUsize,
    }

    impl SensorDelegate for Counting {
        fn on_detect(&self, _sensor: SensorType, _target: &TargetIdentifier) {
            self.detects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_payload_read(
            &self,
            _sensor: SensorType,
            _payload: &PayloadData,
            _target: &TargetIdentifier,
        ) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }

        fn on_state_change(&self, _sensor: SensorType, _state: SensorState) {
            self.states.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_every_delegate_sees_each_event_once() {
        let delegates: Vec<Arc<Counting>> = (0..5).map(|_| Arc::new(Counting::default())).collect();
        let mut set = DelegateSet::new();
        for d in &delegates {
            set.add(Arc::clone(d) as Arc<dyn SensorDelegate>);
        }
        assert_eq!(set.len(), 5);

        let target = TargetIdentifier::random();
        set.emit(SensorType::Ble, &SensorEvent::Detect { target });
        for d in &delegates {
            assert_eq!(d.detects.load(Ordering::SeqCst), 1);
            assert_eq!(d.reads.load(Ordering::SeqCst), 0);
        }

        set.emit(
            SensorType::Ble,
            &SensorEvent::PayloadRead {
                payload: PayloadData::new(vec![1, 2]),
                target,
            },
        );
        set.emit(
            SensorType::Ble,
            &SensorEvent::StateChange {
                state: SensorState::On,
            },
        );
        for d in &delegates {
            assert_eq!(d.detects.load(Ordering::SeqCst), 1);
            assert_eq!(d.reads.load(Ordering::SeqCst), 1);
            assert_eq!(d.states.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_unhandled_capabilities_are_ignored() {
        let counting = Counting::default();
        counting.dispatch(
            SensorType::Ble,
            &SensorEvent::Proximity {
                proximity: Proximity::rssi(-70),
                target: TargetIdentifier::random(),
            },
        );
        assert_eq!(counting.detects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_set_emits_nothing() {
        let set = DelegateSet::new();
        assert!(set.is_empty());
        set.emit(
            SensorType::Ble,
            &SensorEvent::StateChange {
                state: SensorState::Off,
            },
        );
    }

    #[test]
    fn test_event_kind_and_target() {
        let target = TargetIdentifier::random();
        let event = SensorEvent::ProximityWithPayload {
            proximity: Proximity::rssi(-40),
            target,
            payload: PayloadData::new(vec![0xAA]),
        };
        assert_eq!(event.kind(), "proximity_with_payload");
        assert_eq!(event.target(), Some(&target));
        assert_eq!(
            SensorEvent::StateChange {
                state: SensorState::Unavailable
            }
            .target(),
            None
        );
    }

    #[test]
    fn test_contact_log_writes_json_lines() {
        let delegate = ContactLogDelegate::new(Vec::new());
        let target = TargetIdentifier::random();
        delegate.dispatch(
            SensorType::Ble,
            &SensorEvent::PayloadRead {
                payload: PayloadData::new(vec![0xDE, 0xAD]),
                target,
            },
        );
        delegate.dispatch(
            SensorType::Ble,
            &SensorEvent::Proximity {
                proximity: Proximity::rssi(-55),
                target,
            },
        );

        let output = String::from_utf8(delegate.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "payload_read");
        assert_eq!(lines[0]["payload"], "dead");
        assert_eq!(lines[0]["sensor"], "ble");
        assert_eq!(lines[0]["target"], target.to_string());
        assert_eq!(lines[1]["proximity"]["unit"], "rssi");
        assert!(lines[1].get("payload").is_none());
    }

    #[test]
    fn test_logging_delegate_handles_all_events() {
        let target = TargetIdentifier::random();
        let payload = PayloadData::new(vec![1]);
        let events = [
            SensorEvent::Detect { target },
            SensorEvent::PayloadRead {
                payload: payload.clone(),
                target,
            },
            SensorEvent::ImmediateSend {
                data: ImmediateSendData::new(vec![2]),
                target,
            },
            SensorEvent::Shared {
                payloads: vec![payload.clone()],
                target,
            },
            SensorEvent::Proximity {
                proximity: Proximity::rssi(-60),
                target,
            },
            SensorEvent::ProximityWithPayload {
                proximity: Proximity::rssi(-60),
                target,
                payload,
            },
            SensorEvent::StateChange {
                state: SensorState::On,
            },
        ];
        for event in &events {
            LoggingDelegate.dispatch(SensorType::Ble, event);
        }
    }
}
