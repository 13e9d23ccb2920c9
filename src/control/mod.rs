//! Hybrid display control. The direct channel is tried first for every
//! operation it can represent; an unsupported capability or a transient
//! failure falls back to the cloud channel when the operation has a cloud
//! rendition. The channels are not interchangeable retries: direct is a
//! capability superset (only it can upload), cloud a subset.

mod cloud;
mod direct;
mod resolver;
mod translate;
mod types;

pub use cloud::CloudChannel;
pub use direct::DirectChannel;
pub use types::{
    Channel, ChannelError, ControlError, CurrentArt, DeviceIdentity, ImageFormat, Operation,
    OperationReply, Outcome, UploadRequest, UploadResult,
};

use tracing::{debug, error, warn};

use crate::config::Config;

/// Operation surface shared by both control channels.
pub trait ControlChannel {
    fn label(&self) -> Channel;
    fn execute(&self, op: &Operation) -> Result<OperationReply, ChannelError>;
}

impl ControlChannel for DirectChannel {
    fn label(&self) -> Channel {
        Channel::Direct
    }

    fn execute(&self, op: &Operation) -> Result<OperationReply, ChannelError> {
        DirectChannel::execute(self, op)
    }
}

impl ControlChannel for CloudChannel {
    fn label(&self) -> Channel {
        Channel::Cloud
    }

    fn execute(&self, op: &Operation) -> Result<OperationReply, ChannelError> {
        CloudChannel::execute(self, op)
    }
}

/// Orchestrates one display's control channels behind a single operation API.
pub struct HybridController<D = DirectChannel, C = CloudChannel> {
    direct: D,
    cloud: C,
}

impl HybridController {
    pub fn new(config: &Config) -> Self {
        Self {
            direct: DirectChannel::new(config.device_addr.clone(), config.device_token.clone()),
            cloud: CloudChannel::new(
                config.smartthings_token.clone(),
                config.smartthings_device_id.clone(),
            ),
        }
    }

    /// Release the direct session. Safe to call repeatedly.
    pub fn close(&self) {
        self.direct.close();
    }

    pub fn cloud_configured(&self) -> bool {
        self.cloud.has_token()
    }

    pub fn cloud_identity(&self) -> Option<DeviceIdentity> {
        self.cloud.cached_identity()
    }

    pub fn reset_cloud_identity(&self) {
        self.cloud.reset_identity();
    }
}

impl<D: ControlChannel, C: ControlChannel> HybridController<D, C> {
    #[cfg(test)]
    fn with_channels(direct: D, cloud: C) -> Self {
        Self { direct, cloud }
    }

    /// Execute one operation with direct-first fallback.
    pub fn execute(&self, op: Operation) -> Result<Outcome, ControlError> {
        let mut direct_failure = None;

        if translate::direct_request(&op).is_some() {
            match self.direct.execute(&op) {
                Ok(reply) => {
                    debug!(op = op.name(), "direct channel satisfied operation");
                    return Ok(Outcome {
                        reply,
                        channel: self.direct.label(),
                    });
                }
                Err(err) => {
                    match &err {
                        ChannelError::Unsupported => {
                            debug!(op = op.name(), "direct channel lacks capability");
                        }
                        ChannelError::Transient(reason) => {
                            warn!(op = op.name(), reason = %reason, "direct attempt failed");
                        }
                        ChannelError::Fatal(reason) => {
                            error!(op = op.name(), reason = %reason, "direct channel rejected operation");
                        }
                    }
                    let fatal = err.is_fatal();
                    direct_failure = Some(err);
                    if fatal {
                        // An explicit rejection is not retried anywhere; the
                        // cloud rendition would mask it at best.
                        return Err(Self::failure(&op, direct_failure, None));
                    }
                }
            }
        }

        if !op.has_cloud_equivalent() {
            // Capability asymmetry: never consult the cloud for uploads.
            return Err(Self::failure(
                &op,
                direct_failure,
                Some(ChannelError::Unsupported),
            ));
        }

        match self.cloud.execute(&op) {
            Ok(reply) => {
                debug!(op = op.name(), "cloud channel satisfied operation");
                Ok(Outcome {
                    reply,
                    channel: self.cloud.label(),
                })
            }
            Err(err) => {
                match &err {
                    ChannelError::Unsupported => {
                        debug!(op = op.name(), "cloud channel lacks capability");
                    }
                    _ => warn!(op = op.name(), reason = %err, "cloud attempt failed"),
                }
                Err(Self::failure(&op, direct_failure, Some(err)))
            }
        }
    }

    fn failure(
        op: &Operation,
        direct: Option<ChannelError>,
        cloud: Option<ChannelError>,
    ) -> ControlError {
        ControlError {
            operation: op.name(),
            direct,
            cloud,
        }
    }

    // Convenience wrappers over `execute`, one per operation.

    pub fn art_supported(&self) -> Result<Outcome, ControlError> {
        self.execute(Operation::ProbeSupport)
    }

    pub fn upload_image(
        &self,
        bytes: Vec<u8>,
        format: ImageFormat,
        matte: &str,
    ) -> Result<Outcome, ControlError> {
        self.execute(Operation::Upload(UploadRequest {
            bytes,
            format,
            matte: matte.to_string(),
        }))
    }

    pub fn select_image(&self, remote_id: &str, show: bool) -> Result<Outcome, ControlError> {
        self.execute(Operation::SelectImage {
            remote_id: remote_id.to_string(),
            show,
        })
    }

    pub fn current_art(&self) -> Result<Outcome, ControlError> {
        self.execute(Operation::GetCurrentArt)
    }

    pub fn device_info(&self) -> Result<Outcome, ControlError> {
        self.execute(Operation::GetDeviceInfo)
    }

    pub fn send_key(&self, key: &str) -> Result<Outcome, ControlError> {
        self.execute(Operation::SendKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type ChannelFn = dyn Fn(&Operation) -> Result<OperationReply, ChannelError> + Send + Sync;

    struct FakeChannel {
        label: Channel,
        calls: AtomicUsize,
        behavior: Box<ChannelFn>,
    }

    impl FakeChannel {
        fn new(
            label: Channel,
            behavior: impl Fn(&Operation) -> Result<OperationReply, ChannelError>
            + Send
            + Sync
            + 'static,
        ) -> Self {
            Self {
                label,
                calls: AtomicUsize::new(0),
                behavior: Box::new(behavior),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ControlChannel for &FakeChannel {
        fn label(&self) -> Channel {
            self.label
        }

        fn execute(&self, op: &Operation) -> Result<OperationReply, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behavior)(op)
        }
    }

    fn refused(_: &Operation) -> Result<OperationReply, ChannelError> {
        Err(ChannelError::Transient("connection refused".to_string()))
    }

    fn untouchable(_: &Operation) -> Result<OperationReply, ChannelError> {
        panic!("channel must not be invoked");
    }

    fn upload_op() -> Operation {
        Operation::Upload(UploadRequest {
            bytes: vec![0xff, 0xd8, 0xff, 0xe0],
            format: ImageFormat::Jpeg,
            matte: "none".to_string(),
        })
    }

    #[test]
    fn test_direct_success_never_touches_cloud() {
        let direct = FakeChannel::new(Channel::Direct, |_| {
            Ok(OperationReply::Selected { targeted: true })
        });
        let cloud = FakeChannel::new(Channel::Cloud, untouchable);
        let controller = HybridController::with_channels(&direct, &cloud);

        let outcome = controller.select_image("img123", true).unwrap();
        assert_eq!(outcome.channel, Channel::Direct);
        assert!(matches!(
            outcome.reply,
            OperationReply::Selected { targeted: true }
        ));
        assert_eq!(direct.calls(), 1);
        assert_eq!(cloud.calls(), 0);
    }

    #[test]
    fn test_upload_never_invokes_cloud_even_when_direct_unreachable() {
        let direct = FakeChannel::new(Channel::Direct, refused);
        let cloud = FakeChannel::new(Channel::Cloud, untouchable);
        let controller = HybridController::with_channels(&direct, &cloud);

        let err = controller.execute(upload_op()).unwrap_err();
        assert_eq!(cloud.calls(), 0);
        assert_eq!(direct.calls(), 1);
        assert!(err.reason().contains("connection refused"));
    }

    #[test]
    fn test_probe_falls_back_to_cloud_on_refused_connection() {
        let direct = FakeChannel::new(Channel::Direct, refused);
        let cloud = FakeChannel::new(Channel::Cloud, |_| Ok(OperationReply::Supported(true)));
        let controller = HybridController::with_channels(&direct, &cloud);

        let outcome = controller.art_supported().unwrap();
        assert_eq!(outcome.channel, Channel::Cloud);
        assert!(matches!(outcome.reply, OperationReply::Supported(true)));
        assert_eq!(direct.calls(), 1);
        assert_eq!(cloud.calls(), 1);

        // A descriptor without the capability is a negative answer, not an
        // error.
        let direct = FakeChannel::new(Channel::Direct, refused);
        let cloud = FakeChannel::new(Channel::Cloud, |_| Ok(OperationReply::Supported(false)));
        let controller = HybridController::with_channels(&direct, &cloud);
        let outcome = controller.art_supported().unwrap();
        assert!(matches!(outcome.reply, OperationReply::Supported(false)));
    }

    #[test]
    fn test_direct_unsupported_falls_back() {
        let direct = FakeChannel::new(Channel::Direct, |_| Err(ChannelError::Unsupported));
        let cloud = FakeChannel::new(Channel::Cloud, |_| Ok(OperationReply::KeySent));
        let controller = HybridController::with_channels(&direct, &cloud);

        let outcome = controller.send_key("power").unwrap();
        assert_eq!(outcome.channel, Channel::Cloud);
        assert_eq!(cloud.calls(), 1);
    }

    #[test]
    fn test_fatal_direct_failure_short_circuits() {
        let direct = FakeChannel::new(Channel::Direct, |_| {
            Err(ChannelError::Fatal("malformed image data".to_string()))
        });
        let cloud = FakeChannel::new(Channel::Cloud, untouchable);
        let controller = HybridController::with_channels(&direct, &cloud);

        let err = controller.select_image("img123", true).unwrap_err();
        assert_eq!(cloud.calls(), 0);
        assert!(err.reason().contains("malformed image data"));
    }

    #[test]
    fn test_both_failing_reports_more_informative_reason() {
        let direct = FakeChannel::new(Channel::Direct, refused);
        let cloud = FakeChannel::new(Channel::Cloud, |_| Err(ChannelError::Unsupported));
        let controller = HybridController::with_channels(&direct, &cloud);

        let err = controller.current_art().unwrap_err();
        assert_eq!(direct.calls(), 1);
        assert_eq!(cloud.calls(), 1);
        // The generic capability gap must not shadow the concrete failure.
        assert!(err.reason().contains("connection refused"));
        assert!(!err.all_unsupported());
    }

    #[test]
    fn test_cloud_select_reports_untargeted() {
        let direct = FakeChannel::new(Channel::Direct, refused);
        let cloud = FakeChannel::new(Channel::Cloud, |_| {
            Ok(OperationReply::Selected { targeted: false })
        });
        let controller = HybridController::with_channels(&direct, &cloud);

        let outcome = controller.select_image("img123", true).unwrap();
        assert_eq!(outcome.channel, Channel::Cloud);
        assert!(matches!(
            outcome.reply,
            OperationReply::Selected { targeted: false }
        ));
    }
}
