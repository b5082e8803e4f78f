//! Aggregates whose events are applied through a runtime registry.

use std::sync::LazyLock;

use common::AggregateId;
use domain::{
    AggregateRoot, AggregateState, ApplyRegistry, ConfigurationError, DomainError, DomainEvent,
    Message,
};
use event_store::Version;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
enum DeviceEvent {
    Installed { location: String },
    Moved { location: String },
    FirmwareUpdated { release: u32 },
}

impl Message for DeviceEvent {}

impl DomainEvent for DeviceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::Installed { .. } => "DeviceInstalled",
            DeviceEvent::Moved { .. } => "DeviceMoved",
            DeviceEvent::FirmwareUpdated { .. } => "FirmwareUpdated",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Device {
    location: String,
    moves: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("device is offline")]
struct Offline;

fn installed(device: &mut Device, event: &DeviceEvent) {
    if let DeviceEvent::Installed { location } = event {
        device.location = location.clone();
    }
}

fn moved(device: &mut Device, event: &DeviceEvent) {
    if let DeviceEvent::Moved { location } = event {
        device.location = location.clone();
        device.moves += 1;
    }
}

// Firmware updates are not handled by this build.
static APPLY: LazyLock<ApplyRegistry<Device, DeviceEvent>> = LazyLock::new(|| {
    let mut registry = ApplyRegistry::new("Device");
    registry.register("DeviceInstalled", installed).unwrap();
    registry.register("DeviceMoved", moved).unwrap();
    registry
});

impl AggregateState for Device {
    type Event = DeviceEvent;
    type Error = Offline;

    fn aggregate_type() -> &'static str {
        "Device"
    }

    fn apply(&mut self, event: &DeviceEvent) -> Result<(), ConfigurationError> {
        APPLY.apply(self, event)
    }
}

fn installed_device() -> AggregateRoot<Device> {
    AggregateRoot::create(
        AggregateId::new(),
        DeviceEvent::Installed {
            location: "lab".to_string(),
        },
    )
    .unwrap()
}

#[test]
fn test_registered_kinds_apply_through_the_table() {
    let mut device = installed_device();

    device
        .publish(DeviceEvent::Moved {
            location: "roof".to_string(),
        })
        .unwrap();

    assert_eq!(device.state().location, "roof");
    assert_eq!(device.state().moves, 1);
    assert_eq!(device.version(), Version::new(2));
}

#[test]
fn test_publishing_an_unregistered_kind_fails_without_side_effects() {
    let mut device = installed_device();

    let err = device
        .publish(DeviceEvent::FirmwareUpdated { release: 7 })
        .unwrap_err();

    assert_eq!(
        err,
        ConfigurationError::MissingApplyHandler {
            aggregate_type: "Device",
            event_type: "FirmwareUpdated",
        }
    );
    assert_eq!(device.version(), Version::first());
    assert_eq!(device.pending_events().len(), 1);
}

#[test]
fn test_replaying_an_unregistered_kind_fails_too() {
    let mut device = AggregateRoot::<Device>::empty(AggregateId::new());

    let result = device.replay(&DeviceEvent::FirmwareUpdated { release: 2 });

    assert!(result.is_err());
    assert_eq!(device.version(), Version::initial());
}

#[test]
fn test_failed_batch_publishes_none_of_its_events() {
    let mut device = installed_device();

    let err = device
        .execute(|_| {
            Ok(vec![
                DeviceEvent::Moved {
                    location: "roof".to_string(),
                },
                DeviceEvent::FirmwareUpdated { release: 3 },
            ])
        })
        .unwrap_err();

    assert!(matches!(
        err,
        DomainError::Configuration(ConfigurationError::MissingApplyHandler {
            event_type: "FirmwareUpdated",
            ..
        })
    ));
    assert_eq!(device.state().location, "lab");
    assert_eq!(device.state().moves, 0);
    assert_eq!(device.version(), Version::first());
    assert_eq!(device.pending_events().len(), 1);
}

#[test]
fn test_batch_advances_the_version_once_per_event() {
    let mut device = installed_device();

    let published = device
        .execute(|_| {
            Ok(vec![
                DeviceEvent::Moved {
                    location: "roof".to_string(),
                },
                DeviceEvent::Moved {
                    location: "yard".to_string(),
                },
            ])
        })
        .unwrap();

    assert_eq!(published, 2);
    assert_eq!(device.state().moves, 2);
    assert_eq!(device.version(), Version::new(3));
    let versions: Vec<_> = device.pending_events().iter().map(|p| p.version).collect();
    assert_eq!(versions, [Version::first(), Version::new(2), Version::new(3)]);
}
