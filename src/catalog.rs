//! Device and activity catalogs
//!
//! Catalogs are supplied by the host configuration and consumed read-only.
//! Activity order is a priority order: the first activity whose signature
//! matches the observed state wins, so overlapping signatures must be ordered
//! most-specific first by the catalog author. An activity with an empty
//! signature matches unconditionally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recognized device roles, parsed once from the catalog's raw `type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    Tv,
    AvrReceiver,
    Other,
}

impl DeviceKind {
    /// Map a raw catalog `type` string to a device role.
    /// Unrecognized types degrade to `Other` (no telemetry subscriptions).
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "tv" | "lgtv" => Self::Tv,
            "avr" | "avrreceiver" | "denon" => Self::AvrReceiver,
            _ => Self::Other,
        }
    }
}

/// A physical device in a theater.
///
/// The raw `type` string is retained alongside the parsed kind because it is
/// the first segment of the device's telemetry topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub type_name: String,

    /// Physical identifier (MAC address, bridge id) used in topic paths.
    #[serde(rename = "device")]
    pub physical_id: String,

    /// Human-readable name shown by the view layer.
    #[serde(rename = "name")]
    pub display_name: String,
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_type_name(&self.type_name)
    }
}

/// Partial input signature an activity requires to be considered active.
///
/// Only present fields participate in matching; both fields present means
/// both must equal the observed inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avr: Option<String>,
}

impl ActivityInputs {
    /// True when every present field equals the corresponding observed input.
    pub fn matches(&self, tv_input: Option<&str>, avr_input: Option<&str>) -> bool {
        if let Some(want) = self.tv.as_deref() {
            if tv_input != Some(want) {
                return false;
            }
        }
        if let Some(want) = self.avr.as_deref() {
            if avr_input != Some(want) {
                return false;
            }
        }
        true
    }
}

/// A logical activity ("Watch TV", "Listen to Music") defined by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Unique key within the theater.
    pub name: String,

    /// Display name of the device the view focuses when this activity starts.
    #[serde(rename = "defaultDevice")]
    pub default_device: String,

    #[serde(default)]
    pub inputs: ActivityInputs,
}

/// Indexed device/activity catalogs for one theater.
///
/// Duplicate keys resolve last-write-wins, preserving the behavior of the
/// panel this bridge replaces.
#[derive(Debug, Clone, Default)]
pub struct TheaterCatalog {
    devices: Vec<Device>,
    activities: Vec<Activity>,
    device_by_kind: HashMap<DeviceKind, Device>,
    activity_by_name: HashMap<String, Activity>,
}

impl TheaterCatalog {
    pub fn new(devices: Vec<Device>, activities: Vec<Activity>) -> Self {
        let mut device_by_kind = HashMap::new();
        for device in &devices {
            device_by_kind.insert(device.kind(), device.clone());
        }

        let mut activity_by_name = HashMap::new();
        for activity in &activities {
            activity_by_name.insert(activity.name.clone(), activity.clone());
        }

        Self {
            devices,
            activities,
            device_by_kind,
            activity_by_name,
        }
    }

    /// Devices in catalog order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Activities in catalog (priority) order.
    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn device_of_kind(&self, kind: DeviceKind) -> Option<&Device> {
        self.device_by_kind.get(&kind)
    }

    pub fn activity(&self, name: &str) -> Option<&Activity> {
        self.activity_by_name.get(name)
    }

    /// Look up a device by its display name (the key the view layer uses).
    pub fn device_named(&self, display_name: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.display_name == display_name)
    }

    /// First activity (in catalog order) whose signature matches the observed
    /// inputs. Returns None when nothing matches; callers leave the current
    /// selection untouched in that case.
    pub fn matching_activity(
        &self,
        tv_input: Option<&str>,
        avr_input: Option<&str>,
    ) -> Option<&Activity> {
        self.activities
            .iter()
            .find(|a| a.inputs.matches(tv_input, avr_input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(type_name: &str, id: &str, name: &str) -> Device {
        Device {
            type_name: type_name.to_string(),
            physical_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn activity(name: &str, default_device: &str, tv: Option<&str>, avr: Option<&str>) -> Activity {
        Activity {
            name: name.to_string(),
            default_device: default_device.to_string(),
            inputs: ActivityInputs {
                tv: tv.map(String::from),
                avr: avr.map(String::from),
            },
        }
    }

    #[test]
    fn test_kind_from_type_name() {
        assert_eq!(DeviceKind::from_type_name("lgtv"), DeviceKind::Tv);
        assert_eq!(DeviceKind::from_type_name("tv"), DeviceKind::Tv);
        assert_eq!(DeviceKind::from_type_name("denon"), DeviceKind::AvrReceiver);
        assert_eq!(
            DeviceKind::from_type_name("avrReceiver"),
            DeviceKind::AvrReceiver
        );
        assert_eq!(DeviceKind::from_type_name("projector"), DeviceKind::Other);
    }

    #[test]
    fn test_duplicate_entries_last_write_wins() {
        let catalog = TheaterCatalog::new(
            vec![
                device("lgtv", "aa:bb", "Old TV"),
                device("lgtv", "cc:dd", "New TV"),
            ],
            vec![
                activity("Watch TV", "Old TV", Some("hdmi1"), None),
                activity("Watch TV", "New TV", Some("hdmi2"), None),
            ],
        );

        assert_eq!(
            catalog.device_of_kind(DeviceKind::Tv).unwrap().display_name,
            "New TV"
        );
        assert_eq!(
            catalog.activity("Watch TV").unwrap().default_device,
            "New TV"
        );
    }

    #[test]
    fn test_empty_catalogs_degrade_to_empty_maps() {
        let catalog = TheaterCatalog::new(vec![], vec![]);
        assert!(catalog.devices().is_empty());
        assert!(catalog.device_of_kind(DeviceKind::Tv).is_none());
        assert!(catalog.matching_activity(Some("hdmi1"), None).is_none());
    }

    #[test]
    fn test_signature_requires_all_present_fields() {
        let both = ActivityInputs {
            tv: Some("hdmi1".into()),
            avr: Some("dvd".into()),
        };
        assert!(both.matches(Some("hdmi1"), Some("dvd")));
        assert!(!both.matches(Some("hdmi1"), Some("sat")));
        assert!(!both.matches(Some("hdmi1"), None));
        assert!(!both.matches(None, Some("dvd")));
    }

    #[test]
    fn test_first_match_wins_in_catalog_order() {
        let catalog = TheaterCatalog::new(
            vec![],
            vec![
                activity("Watch TV", "TV", Some("hdmi1"), None),
                activity("Also HDMI 1", "TV", Some("hdmi1"), None),
            ],
        );
        assert_eq!(
            catalog.matching_activity(Some("hdmi1"), None).unwrap().name,
            "Watch TV"
        );
    }

    #[test]
    fn test_reordering_unmatched_activities_preserves_result() {
        let matched = activity("Watch TV", "TV", Some("hdmi1"), None);
        let other_a = activity("Netflix", "TV", Some("netflix"), None);
        let other_b = activity("Music", "AVR", None, Some("cd"));

        let first = TheaterCatalog::new(
            vec![],
            vec![other_a.clone(), matched.clone(), other_b.clone()],
        );
        let second = TheaterCatalog::new(vec![], vec![other_b, matched, other_a]);

        assert_eq!(
            first.matching_activity(Some("hdmi1"), None).unwrap().name,
            second.matching_activity(Some("hdmi1"), None).unwrap().name,
        );
    }

    #[test]
    fn test_empty_signature_matches_unconditionally() {
        let catalog = TheaterCatalog::new(vec![], vec![activity("All Off", "None", None, None)]);
        assert_eq!(
            catalog.matching_activity(None, None).unwrap().name,
            "All Off"
        );
    }
}
