//! Cloud-side device identity discovery. The account device list is scanned
//! for a plausible Frame-class display and the first hit is memoized for the
//! orchestrator's lifetime. A miss is never cached: the account's device
//! list can change, so the next call retries discovery.

use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info};

use super::types::{ChannelError, DeviceIdentity};

/// Product-family token looked for in device names and labels.
const FAMILY_TOKEN: &str = "frame";

pub struct IdentityResolver {
    /// Pre-configured device id; short-circuits discovery entirely.
    configured: Option<String>,
    cached: Mutex<Option<DeviceIdentity>>,
}

impl IdentityResolver {
    pub fn new(configured: Option<String>) -> Self {
        Self {
            configured,
            cached: Mutex::new(None),
        }
    }

    /// Resolve the cloud identity, calling `list_devices` at most once per
    /// successful resolution. The memo lock is held across the fetch so
    /// concurrent callers cannot race duplicate list calls.
    pub fn resolve<F>(&self, list_devices: F) -> Result<DeviceIdentity, ChannelError>
    where
        F: FnOnce() -> Result<Vec<Value>, ChannelError>,
    {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(identity) = cached.as_ref() {
            return Ok(identity.clone());
        }

        if let Some(device_id) = &self.configured {
            // Descriptor stays empty; callers fetch it on demand.
            let identity = DeviceIdentity {
                device_id: device_id.clone(),
                descriptor: Value::Null,
            };
            *cached = Some(identity.clone());
            return Ok(identity);
        }

        let devices = list_devices()?;
        match devices.iter().find(|device| Self::matches(device)) {
            Some(device) => {
                let device_id = device
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ChannelError::Transient("device entry without deviceId".to_string())
                    })?
                    .to_string();
                info!(device_id = %device_id, "resolved display in account device list");
                let identity = DeviceIdentity {
                    device_id,
                    descriptor: device.clone(),
                };
                *cached = Some(identity.clone());
                Ok(identity)
            }
            None => {
                debug!(scanned = devices.len(), "no matching display in account device list");
                Err(ChannelError::Unsupported)
            }
        }
    }

    /// Drop the memoized identity so the next call re-runs discovery.
    pub fn reset(&self) {
        self.cached.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn cached(&self) -> Option<DeviceIdentity> {
        self.cached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn matches(device: &Value) -> bool {
        let field_contains = |key: &str, needle: &str| {
            device
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|value| value.to_lowercase().contains(needle))
        };
        field_contains("name", FAMILY_TOKEN)
            || field_contains("label", FAMILY_TOKEN)
            || field_contains("deviceTypeName", "tv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame_device() -> Value {
        json!({
            "deviceId": "abc-123",
            "name": "[TV] Samsung The Frame 55",
            "label": "Living room",
            "deviceTypeName": "Samsung OCF TV",
        })
    }

    #[test]
    fn test_resolution_is_memoized() {
        let resolver = IdentityResolver::new(None);
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![frame_device()])
        };

        let first = resolver.resolve(fetch).unwrap();
        assert_eq!(first.device_id, "abc-123");
        let second = resolver
            .resolve(|| panic!("second resolve must use the cache"))
            .unwrap();
        assert_eq!(second.device_id, "abc-123");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_not_found_is_retried_not_cached() {
        let resolver = IdentityResolver::new(None);
        let calls = AtomicUsize::new(0);

        let empty = resolver.resolve(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![json!({"deviceId": "x", "name": "Dishwasher"})])
        });
        assert!(matches!(empty, Err(ChannelError::Unsupported)));

        // Device shows up later; the second call must list again and find it.
        let found = resolver.resolve(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![frame_device()])
        });
        assert_eq!(found.unwrap().device_id, "abc-123");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_configured_id_skips_discovery() {
        let resolver = IdentityResolver::new(Some("configured-id".to_string()));
        let identity = resolver
            .resolve(|| panic!("configured id must not trigger a list call"))
            .unwrap();
        assert_eq!(identity.device_id, "configured-id");
        assert!(identity.descriptor.is_null());
    }

    #[test]
    fn test_reset_forces_rediscovery() {
        let resolver = IdentityResolver::new(None);
        resolver.resolve(|| Ok(vec![frame_device()])).unwrap();
        assert!(resolver.cached().is_some());

        resolver.reset();
        assert!(resolver.cached().is_none());

        let calls = AtomicUsize::new(0);
        resolver
            .resolve(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![frame_device()])
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_match_heuristics() {
        let resolver = IdentityResolver::new(None);
        // Matches on label even when name is unhelpful.
        let by_label = resolver.resolve(|| {
            Ok(vec![json!({
                "deviceId": "by-label",
                "name": "Samsung 8 Series",
                "label": "Kitchen Frame",
            })])
        });
        assert_eq!(by_label.unwrap().device_id, "by-label");

        // List errors propagate untouched.
        let resolver = IdentityResolver::new(None);
        let err = resolver
            .resolve(|| Err(ChannelError::Transient("list timeout".to_string())))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Transient(_)));
    }
}
