//! Outbound device commands
//!
//! Remote-control button presses are forwarded to the device bridge as
//! `<namespace>/<deviceId>/set/device/<actionId>` with the command name as
//! the payload. The namespace is configured per installation (the default
//! matches the Harmony hub bridge the panel was built against).

use serde::{Deserialize, Serialize};

pub const DEFAULT_COMMAND_NAMESPACE: &str = "harmony";

/// One remote-control command as the view layer submits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Bridge-side device identifier the action targets.
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// Bridge-side action identifier (one button).
    #[serde(rename = "actionId")]
    pub action_id: String,

    /// Command name sent as the payload (e.g. "PowerToggle").
    pub name: String,
}

impl DeviceCommand {
    /// Full publish topic for this command.
    pub fn topic(&self, namespace: &str) -> String {
        format!("{}/{}/set/device/{}", namespace, self.device_id, self.action_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_topic_format() {
        let command = DeviceCommand {
            device_id: "53916966".to_string(),
            action_id: "Yellow".to_string(),
            name: "Yellow".to_string(),
        };
        assert_eq!(
            command.topic("harmony"),
            "harmony/53916966/set/device/Yellow"
        );
    }

    #[test]
    fn test_command_decodes_view_payload() {
        let command: DeviceCommand = serde_json::from_str(
            r#"{"deviceId":"tv-1","actionId":"VolumeUp","name":"VolumeUp"}"#,
        )
        .unwrap();
        assert_eq!(command.device_id, "tv-1");
        assert_eq!(command.action_id, "VolumeUp");
    }
}
