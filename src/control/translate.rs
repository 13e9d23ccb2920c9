//! Pure translation from logical operations to channel-specific payloads.
//! No state, no I/O; the only failure mode is the `None` sentinel for an
//! operation a channel cannot represent at all.

use lazy_static::lazy_static;
use serde_json::{Value, json};
use std::collections::HashMap;

use super::types::Operation;

lazy_static! {
    /// Abstract key id -> (direct protocol token, cloud command token).
    static ref KEY_MAP: HashMap<&'static str, (&'static str, &'static str)> = {
        let mut m = HashMap::new();
        m.insert("power", ("KEY_POWER", "power"));
        m.insert("power-on", ("KEY_POWERON", "on"));
        m.insert("power-off", ("KEY_POWEROFF", "off"));
        m.insert("home", ("KEY_HOME", "home"));
        m.insert("menu", ("KEY_MENU", "menu"));
        m.insert("arrow-up", ("KEY_UP", "up"));
        m.insert("arrow-down", ("KEY_DOWN", "down"));
        m.insert("arrow-left", ("KEY_LEFT", "left"));
        m.insert("arrow-right", ("KEY_RIGHT", "right"));
        m.insert("enter", ("KEY_ENTER", "enter"));
        m.insert("back", ("KEY_RETURN", "back"));
        m.insert("exit", ("KEY_EXIT", "exit"));
        m.insert("source", ("KEY_SOURCE", "source"));
        m
    };
}

/// Direct-protocol token for an abstract key. Total: keys already carrying
/// the protocol prefix pass through, anything else is uppercased with
/// separators collapsed to underscores.
pub fn direct_key(key: &str) -> String {
    if let Some((direct, _)) = KEY_MAP.get(key) {
        return (*direct).to_string();
    }
    if key.starts_with("KEY_") && key.len() > 4 {
        return key.to_string();
    }
    let token: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if token.chars().all(|c| c == '_') {
        return "KEY_UNKNOWN".to_string();
    }
    format!("KEY_{token}")
}

/// Cloud command token for an abstract key. Total: unmapped keys strip the
/// protocol prefix (if any) and lowercase.
pub fn cloud_key(key: &str) -> String {
    if let Some((_, cloud)) = KEY_MAP.get(key) {
        return (*cloud).to_string();
    }
    let stripped = key.strip_prefix("KEY_").unwrap_or(key);
    let token = stripped.trim().to_ascii_lowercase();
    if token.is_empty() {
        "unknown".to_string()
    } else {
        token
    }
}

/// Request body for the direct channel, or `None` when the local protocol
/// has no rendition of the operation. Upload payloads carry only the
/// transfer metadata; the byte stream travels out of band.
pub fn direct_request(op: &Operation) -> Option<Value> {
    let body = match op {
        Operation::ProbeSupport => json!({ "request": "get_api_version" }),
        Operation::Upload(request) => json!({
            "request": "send_image",
            "file_type": request.format.direct_token(),
            "file_size": request.bytes.len(),
            "matte_id": request.matte,
        }),
        Operation::SelectImage { remote_id, show } => json!({
            "request": "select_image",
            "content_id": remote_id,
            "show": show,
        }),
        Operation::GetCurrentArt => json!({ "request": "get_current_artwork" }),
        Operation::GetDeviceInfo => json!({ "request": "get_device_info" }),
        Operation::SendKey(key) => json!({
            "method": "ms.remote.control",
            "params": {
                "Cmd": "Click",
                "DataOfCmd": direct_key(key),
                "Option": "false",
                "TypeOfRemote": "SendRemoteKey",
            },
        }),
    };
    Some(body)
}

/// Command body for the cloud channel, or `None` when the cloud API has no
/// rendition of the operation. GET-shaped operations return `Value::Null`:
/// attempt-worthy, but no request body. Note the select-image gap: the cloud
/// can only switch the display into its art mode, never target a specific
/// remote id.
pub fn cloud_command(op: &Operation) -> Option<Value> {
    match op {
        // The cloud API has no operation for installing custom images.
        Operation::Upload(_) => None,
        Operation::SelectImage { .. } => Some(json!({
            "commands": [{
                "component": "main",
                "capability": "custom.picturemode",
                "command": "setPictureMode",
                "arguments": ["Art"],
            }]
        })),
        Operation::SendKey(key) => Some(json!({
            "commands": [{
                "component": "main",
                "capability": "mediaInputSource",
                "command": "setInputSource",
                "arguments": [cloud_key(key)],
            }]
        })),
        Operation::ProbeSupport | Operation::GetCurrentArt | Operation::GetDeviceInfo => {
            Some(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::{ImageFormat, UploadRequest};

    #[test]
    fn test_direct_key_mapped() {
        assert_eq!(direct_key("power"), "KEY_POWER");
        assert_eq!(direct_key("arrow-up"), "KEY_UP");
        assert_eq!(direct_key("back"), "KEY_RETURN");
    }

    #[test]
    fn test_direct_key_passthrough_and_derived() {
        assert_eq!(direct_key("KEY_NETFLIX"), "KEY_NETFLIX");
        assert_eq!(direct_key("volume up"), "KEY_VOLUME_UP");
        assert_eq!(direct_key("info"), "KEY_INFO");
    }

    #[test]
    fn test_cloud_key_mapped_and_derived() {
        assert_eq!(cloud_key("power"), "power");
        assert_eq!(cloud_key("KEY_POWER"), "power");
        assert_eq!(cloud_key("KEY_NETFLIX"), "netflix");
        assert_eq!(cloud_key("arrow-left"), "left");
    }

    #[test]
    fn test_key_translation_is_total() {
        // Arbitrary garbage must still produce a usable token on both sides.
        for key in ["", "   ", "KEY_", "???", "déjà-vu", "a"] {
            assert!(!direct_key(key).is_empty(), "direct_key({key:?})");
            assert!(!cloud_key(key).is_empty(), "cloud_key({key:?})");
        }
        assert_eq!(direct_key(""), "KEY_UNKNOWN");
        assert_eq!(cloud_key(""), "unknown");
        assert_eq!(cloud_key("KEY_"), "unknown");
    }

    #[test]
    fn test_upload_not_representable_on_cloud() {
        let op = Operation::Upload(UploadRequest {
            bytes: vec![1, 2, 3, 4],
            format: ImageFormat::Png,
            matte: "none".to_string(),
        });
        assert!(cloud_command(&op).is_none());
        // The direct side carries the transfer metadata.
        let body = direct_request(&op).unwrap();
        assert_eq!(body["request"], "send_image");
        assert_eq!(body["file_type"], "PNG");
        assert_eq!(body["file_size"], 4);
    }

    #[test]
    fn test_cloud_select_only_switches_mode() {
        let op = Operation::SelectImage {
            remote_id: "MY_F0042".to_string(),
            show: true,
        };
        let body = cloud_command(&op).unwrap();
        let command = &body["commands"][0];
        assert_eq!(command["capability"], "custom.picturemode");
        // The remote id cannot appear anywhere in the cloud command.
        assert!(!body.to_string().contains("MY_F0042"));
    }

    #[test]
    fn test_send_key_payload_shapes() {
        let op = Operation::SendKey("power".to_string());
        let direct = direct_request(&op).unwrap();
        assert_eq!(direct["method"], "ms.remote.control");
        assert_eq!(direct["params"]["DataOfCmd"], "KEY_POWER");

        let cloud = cloud_command(&op).unwrap();
        assert_eq!(cloud["commands"][0]["capability"], "mediaInputSource");
        assert_eq!(cloud["commands"][0]["arguments"][0], "power");
    }

    #[test]
    fn test_every_operation_representable_on_direct() {
        let ops = [
            Operation::ProbeSupport,
            Operation::GetCurrentArt,
            Operation::GetDeviceInfo,
            Operation::SendKey("home".to_string()),
        ];
        for op in ops {
            assert!(direct_request(&op).is_some(), "{}", op.name());
        }
    }
}
