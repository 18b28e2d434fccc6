//! Telemetry signals and observed device state
//!
//! Inbound status topics follow `<deviceType>/<physicalId>/status/<signal>`.
//! Signals are parsed into an enumerated type once, when the engine builds its
//! topic route table at mount; runtime dispatch is an exact topic lookup, so a
//! physical id that happens to contain a signal name cannot misroute.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::catalog::{Device, DeviceKind};

/// Telemetry signals this bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// TV power state ("on"/"off").
    Power,
    /// Foreground application on the TV.
    ForegroundApp,
    /// App id → launch point map published by the TV bridge.
    LaunchPoints,
    /// Active input selected on the AVR (`SI` on Denon bridges).
    AvrInput,
}

impl Signal {
    /// The status-topic segment the device bridge publishes this signal under.
    pub fn status_segment(&self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::ForegroundApp => "foregroundApp",
            Self::LaunchPoints => "launchPoints",
            Self::AvrInput => "SI",
        }
    }

    /// Parse a status-topic segment. `currentInput` is an accepted alias for
    /// `SI` (newer AVR bridges publish it under that name).
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "power" => Some(Self::Power),
            "foregroundApp" => Some(Self::ForegroundApp),
            "launchPoints" => Some(Self::LaunchPoints),
            "SI" | "currentInput" => Some(Self::AvrInput),
            _ => None,
        }
    }
}

/// Signals subscribed for a device of the given kind. Unrecognized kinds get
/// no subscriptions; that is expected, not an error.
pub fn signals_for_kind(kind: DeviceKind) -> &'static [Signal] {
    match kind {
        DeviceKind::Tv => &[Signal::Power, Signal::ForegroundApp, Signal::LaunchPoints],
        DeviceKind::AvrReceiver => &[Signal::AvrInput],
        DeviceKind::Other => &[],
    }
}

/// Full status topic for one device/signal pair.
pub fn status_topic(device: &Device, signal: Signal) -> String {
    format!(
        "{}/{}/status/{}",
        device.type_name,
        device.physical_id,
        signal.status_segment()
    )
}

/// Topic → signal routes for every recognized device in a catalog. Built once
/// at engine mount; the same table drives unsubscription at unmount, so setup
/// and teardown are symmetric by construction.
pub fn routes_for(devices: &[Device]) -> HashMap<String, Signal> {
    let mut routes = HashMap::new();
    for device in devices {
        for &signal in signals_for_kind(device.kind()) {
            routes.insert(status_topic(device, signal), signal);
        }
    }
    routes
}

/// TV power state as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

/// Foreground application payload from the TV bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForegroundApp {
    #[serde(rename = "appId")]
    pub app_id: String,
}

/// One entry of the launch-points map. Titles are occasionally missing for
/// system apps; resolution falls back to the literal "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchPoint {
    #[serde(default)]
    pub title: Option<String>,
}

/// Mutable per-theater view of device telemetry. Fields persist until
/// overwritten by a later message; nothing resets between messages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservedState {
    pub power: PowerState,

    #[serde(rename = "foregroundApp")]
    pub foreground_app: Option<ForegroundApp>,

    #[serde(rename = "launchPoints")]
    pub launch_points: Option<HashMap<String, LaunchPoint>>,

    /// Resolved, normalized TV input label (e.g. "hdmi1"). Stale while the TV
    /// is off; matching is power-gated before this is read.
    #[serde(rename = "tvInput")]
    pub tv_input: Option<String>,

    #[serde(rename = "avrInput")]
    pub avr_input: Option<String>,
}

impl ObservedState {
    /// Write one decoded payload into the state, then re-resolve the TV
    /// input. Pure state mutation: activity matching happens in the engine
    /// after this returns. Undecodable payloads are dropped.
    pub fn apply(&mut self, signal: Signal, payload: &str) {
        match signal {
            Signal::Power => {
                self.power = match payload.trim() {
                    "on" => PowerState::On,
                    "off" => PowerState::Off,
                    other => {
                        debug!(payload = other, "unrecognized power payload");
                        PowerState::Unknown
                    }
                };
            }
            Signal::ForegroundApp => match serde_json::from_str(payload) {
                Ok(app) => self.foreground_app = Some(app),
                Err(e) => debug!(error = %e, "dropping undecodable foregroundApp payload"),
            },
            Signal::LaunchPoints => match serde_json::from_str(payload) {
                Ok(points) => self.launch_points = Some(points),
                Err(e) => debug!(error = %e, "dropping undecodable launchPoints payload"),
            },
            Signal::AvrInput => {
                self.avr_input = Some(payload.trim().to_string());
            }
        }

        self.resolve_tv_input();
    }

    /// Resolve the human-readable TV input from the foreground app and the
    /// launch-points map. Skipped entirely while the TV is not on: the stale
    /// label stays in place and matching is gated on power instead.
    fn resolve_tv_input(&mut self) {
        if self.power != PowerState::On {
            return;
        }
        let (Some(app), Some(points)) = (&self.foreground_app, &self.launch_points) else {
            return;
        };
        if app.app_id.is_empty() {
            return;
        }

        let title = points
            .get(&app.app_id)
            .and_then(|p| p.title.as_deref())
            .unwrap_or("unknown");
        self.tv_input = Some(normalize_input_label(title));
    }
}

/// Normalize an input label for signature comparison: strip whitespace,
/// lowercase. "HDMI 1" and "hdmi1" compare equal.
pub fn normalize_input_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
