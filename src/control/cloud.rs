//! SmartThings cloud channel. Stateless per call: every operation is an
//! independent bearer-authenticated HTTPS request against the account's
//! device-management API, addressed by a lazily resolved device identity.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use super::resolver::IdentityResolver;
use super::translate;
use super::types::{ChannelError, CurrentArt, DeviceIdentity, Operation, OperationReply};

const BASE_URL: &str = "https://api.smartthings.com/v1";
const TIMEOUT: Duration = Duration::from_secs(10);

enum Method {
    Get,
    Post,
}

pub struct CloudChannel {
    token: Option<String>,
    resolver: IdentityResolver,
}

impl CloudChannel {
    pub fn new(token: Option<String>, configured_device_id: Option<String>) -> Self {
        Self {
            token,
            resolver: IdentityResolver::new(configured_device_id),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn cached_identity(&self) -> Option<DeviceIdentity> {
        self.resolver.cached()
    }

    pub fn reset_identity(&self) {
        self.resolver.reset();
    }

    /// Run one operation through the cloud API. Upload requests never get
    /// here past the translator gate: the API has no rendition of them.
    pub fn execute(&self, op: &Operation) -> Result<OperationReply, ChannelError> {
        let Some(command) = translate::cloud_command(op) else {
            return Err(ChannelError::Unsupported);
        };
        let identity = self.resolve_identity()?;
        debug!(op = op.name(), device_id = %identity.device_id, "cloud attempt");

        match op {
            Operation::ProbeSupport => {
                let descriptor = self.device_descriptor(&identity)?;
                Ok(OperationReply::Supported(descriptor_mentions_art(&descriptor)))
            }
            Operation::Upload(_) => Err(ChannelError::Unsupported),
            Operation::SelectImage { .. } => {
                self.post_command(&identity, &command)?;
                // Capability gap: the cloud switched the display into art
                // mode but could not target the requested remote id.
                Ok(OperationReply::Selected { targeted: false })
            }
            Operation::GetCurrentArt => {
                let status = self.api_request(
                    Method::Get,
                    &format!("devices/{}/status", identity.device_id),
                    None,
                )?;
                picture_mode(&status)
                    .map(|mode| OperationReply::CurrentArt(CurrentArt::Mode { mode }))
                    .ok_or(ChannelError::Unsupported)
            }
            Operation::GetDeviceInfo => self
                .api_request(Method::Get, &format!("devices/{}", identity.device_id), None)
                .map(OperationReply::DeviceInfo),
            Operation::SendKey(_) => {
                self.post_command(&identity, &command)?;
                Ok(OperationReply::KeySent)
            }
        }
    }

    /// List the account's registered devices, as raw descriptor objects.
    pub fn list_devices(&self) -> Result<Vec<Value>, ChannelError> {
        let response = self.api_request(Method::Get, "devices", None)?;
        Ok(response
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn resolve_identity(&self) -> Result<DeviceIdentity, ChannelError> {
        self.resolver.resolve(|| self.list_devices())
    }

    /// Descriptor from the resolution cache, or fetched fresh when the
    /// identity came pre-configured and carries none.
    fn device_descriptor(&self, identity: &DeviceIdentity) -> Result<Value, ChannelError> {
        if !identity.descriptor.is_null() {
            return Ok(identity.descriptor.clone());
        }
        self.api_request(Method::Get, &format!("devices/{}", identity.device_id), None)
    }

    fn post_command(
        &self,
        identity: &DeviceIdentity,
        command: &Value,
    ) -> Result<Value, ChannelError> {
        self.api_request(
            Method::Post,
            &format!("devices/{}/commands", identity.device_id),
            Some(command),
        )
    }

    fn build_client() -> Result<Client, ChannelError> {
        Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Transient(format!("http client: {e}")))
    }

    /// Make an authenticated API request with classified failures: a missing
    /// token is a configuration gap (`Unsupported`), transport and server
    /// trouble is `Transient`, and a well-formed command rejection is
    /// `Unsupported`.
    fn api_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, ChannelError> {
        let Some(token) = &self.token else {
            return Err(ChannelError::Unsupported);
        };

        let client = Self::build_client()?;
        let url = format!("{BASE_URL}/{endpoint}");

        let request = match method {
            Method::Get => client.get(&url),
            Method::Post => client.post(&url),
        }
        .bearer_auth(token)
        .header("Content-Type", "application/json");

        let request = if let Some(body) = body {
            request.json(body)
        } else {
            request
        };

        let response = request.send().map_err(|e| {
            let kind = if e.is_timeout() { "timeout" } else { "request failed" };
            ChannelError::Transient(format!("{kind} on {endpoint}: {e}"))
        })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| ChannelError::Transient(format!("read body from {endpoint}: {e}")))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            // An explicit, well-formed rejection of the command means the
            // capability is absent; everything else is transport trouble.
            if (status.as_u16() == 400 || status.as_u16() == 422)
                && serde_json::from_str::<Value>(&text).is_ok()
            {
                debug!(endpoint, %status, "cloud rejected command as unsupported");
                return Err(ChannelError::Unsupported);
            }
            return Err(ChannelError::Transient(format!(
                "{endpoint} returned {status}: {snippet}"
            )));
        }

        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ChannelError::Transient(format!("malformed body from {endpoint}: {e}")))
    }
}

/// True when any component capability id in a device descriptor references
/// the art/display feature.
fn descriptor_mentions_art(descriptor: &Value) -> bool {
    let Some(components) = descriptor.get("components").and_then(Value::as_array) else {
        return false;
    };
    components
        .iter()
        .filter_map(|component| component.get("capabilities").and_then(Value::as_array))
        .flatten()
        .filter_map(|capability| capability.get("id").and_then(Value::as_str))
        .any(|id| id.to_lowercase().contains("art"))
}

/// Extract the active picture mode from a device status payload. Accepts
/// both the keyed-component and list-of-components response shapes.
fn picture_mode(status: &Value) -> Option<String> {
    let components = status.get("components")?;
    let candidates: Vec<&Value> = match components {
        Value::Object(map) => map.values().collect(),
        Value::Array(list) => list.iter().collect(),
        _ => return None,
    };
    for component in candidates {
        let Some(capability) = component
            .get("custom.picturemode")
            .or_else(|| component.get("pictureMode"))
        else {
            continue;
        };
        let value = capability
            .get("pictureMode")
            .and_then(|attribute| attribute.get("value"))
            .or_else(|| capability.get("value"));
        if let Some(mode) = value.and_then(Value::as_str) {
            return Some(mode.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::{ImageFormat, UploadRequest};
    use serde_json::json;

    #[test]
    fn test_descriptor_mentions_art() {
        let descriptor = json!({
            "components": [{
                "id": "main",
                "capabilities": [
                    { "id": "switch" },
                    { "id": "samsungvd.artMode" },
                ],
            }],
        });
        assert!(descriptor_mentions_art(&descriptor));

        let without = json!({
            "components": [{
                "id": "main",
                "capabilities": [{ "id": "switch" }, { "id": "audioVolume" }],
            }],
        });
        assert!(!descriptor_mentions_art(&without));
        assert!(!descriptor_mentions_art(&json!({})));
    }

    #[test]
    fn test_picture_mode_keyed_components() {
        let status = json!({
            "components": {
                "main": {
                    "custom.picturemode": {
                        "pictureMode": { "value": "Art", "timestamp": "2025-11-02T10:00:00Z" },
                    },
                },
            },
        });
        assert_eq!(picture_mode(&status).as_deref(), Some("Art"));
    }

    #[test]
    fn test_picture_mode_component_list() {
        let status = json!({
            "components": [
                { "id": "main", "pictureMode": { "value": "Dynamic" } },
            ],
        });
        assert_eq!(picture_mode(&status).as_deref(), Some("Dynamic"));
        assert_eq!(picture_mode(&json!({ "components": {} })), None);
    }

    #[test]
    fn test_upload_is_structurally_unsupported() {
        // No token, no identity, no network: the translator gate alone must
        // reject uploads before anything else is consulted.
        let channel = CloudChannel::new(None, None);
        let op = Operation::Upload(UploadRequest {
            bytes: vec![0xff, 0xd8, 0xff, 0xe0],
            format: ImageFormat::Jpeg,
            matte: "none".to_string(),
        });
        assert!(matches!(channel.execute(&op), Err(ChannelError::Unsupported)));
    }

    #[test]
    fn test_missing_token_reports_unsupported() {
        let channel = CloudChannel::new(None, Some("dev-1".to_string()));
        let result = channel.execute(&Operation::SendKey("power".to_string()));
        assert!(matches!(result, Err(ChannelError::Unsupported)));
    }
}
