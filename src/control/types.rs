//! Shared types for hybrid display control. Defines the operation model, the
//! per-channel outcome taxonomy, and the aggregated failure reported when
//! every eligible channel has declined an operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Image payload formats the display accepts for art uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Token the direct art protocol expects in transfer requests.
    pub fn direct_token(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn from_mime(essence: &str) -> Option<Self> {
        match essence {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// Raw image bytes plus the metadata the display wants alongside them.
#[derive(Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub matte: String,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The byte buffer can be megabytes; log its size, not its content.
        f.debug_struct("UploadRequest")
            .field("bytes", &self.bytes.len())
            .field("format", &self.format)
            .field("matte", &self.matte)
            .finish()
    }
}

/// One logical control request, independent of the channel that executes it.
#[derive(Debug, Clone)]
pub enum Operation {
    ProbeSupport,
    Upload(UploadRequest),
    SelectImage { remote_id: String, show: bool },
    GetCurrentArt,
    GetDeviceInfo,
    SendKey(String),
}

impl Operation {
    /// Short name used in logs and failure reasons.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProbeSupport => "probe-support",
            Self::Upload(_) => "upload",
            Self::SelectImage { .. } => "select-image",
            Self::GetCurrentArt => "current-art",
            Self::GetDeviceInfo => "device-info",
            Self::SendKey(_) => "send-key",
        }
    }

    /// Whether the cloud API has any rendition of this operation. Uploads are
    /// direct-only: the cloud API has no way to install custom images.
    pub fn has_cloud_equivalent(&self) -> bool {
        !matches!(self, Self::Upload(_))
    }
}

/// Remote identifier the display assigns to an uploaded image. Only the
/// direct channel can produce one; it is the sole handle for selecting the
/// image later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub remote_id: String,
}

/// Currently displayed art, in the schema of whichever channel answered.
/// The two schemas are deliberately not unified.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum CurrentArt {
    /// Rich metadata from the direct art channel.
    Artwork { content_id: String, details: Value },
    /// The cloud API only reports the active picture mode.
    Mode { mode: String },
}

/// Successful payload of one channel attempt.
#[derive(Debug, Clone)]
pub enum OperationReply {
    Supported(bool),
    Uploaded(UploadResult),
    /// `targeted` is false when the channel could only switch the display
    /// mode rather than select the requested remote id.
    Selected { targeted: bool },
    CurrentArt(CurrentArt),
    DeviceInfo(Value),
    KeySent,
}

/// Which control path produced a result. Surfaced to callers only through
/// diagnostic endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Direct,
    Cloud,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

/// Reply plus the channel that produced it.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub reply: OperationReply,
    pub channel: Channel,
}

/// Classified failure of a single channel attempt. The variant decides
/// whether the orchestrator tries the other channel.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The capability is absent on this channel, or the channel is not
    /// configured. Expected, not an error condition.
    #[error("not supported on this channel")]
    Unsupported,
    /// Connectivity or timeout trouble; the other channel may still work.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Explicit rejection from the remote side. Retrying the same payload
    /// would not help.
    #[error("rejected: {0}")]
    Fatal(String),
}

impl ChannelError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Ordering used when picking the more informative of two failures.
    fn specificity(&self) -> u8 {
        match self {
            Self::Unsupported => 0,
            Self::Transient(_) => 1,
            Self::Fatal(_) => 2,
        }
    }
}

/// Aggregated failure after every eligible channel declined an operation.
/// Displays the more informative of the recorded channel failures.
#[derive(Debug, Clone)]
pub struct ControlError {
    pub operation: &'static str,
    pub direct: Option<ChannelError>,
    pub cloud: Option<ChannelError>,
}

impl ControlError {
    /// The most specific failure reason across both channels. Fatal beats
    /// transient beats unsupported.
    pub fn reason(&self) -> String {
        self.direct
            .iter()
            .chain(self.cloud.iter())
            .max_by_key(|err| err.specificity())
            .map_or_else(|| "no control channel attempted".to_string(), |err| err.to_string())
    }

    /// True when every attempted channel reported the capability as absent,
    /// as opposed to failing while trying.
    pub fn all_unsupported(&self) -> bool {
        self.direct
            .iter()
            .chain(self.cloud.iter())
            .all(|err| matches!(err, ChannelError::Unsupported))
    }
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.reason())
    }
}

impl std::error::Error for ControlError {}

/// Cloud-side identity of the display, resolved from the account device list
/// and cached for the orchestrator's lifetime. The raw descriptor is kept so
/// capability probes do not have to re-fetch it.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    #[serde(skip)]
    pub descriptor: Value,
}
