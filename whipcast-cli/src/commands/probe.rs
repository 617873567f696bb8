//! Probe command - report source availability

use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use whipcast_core::capture::{CapabilityProber, SyntheticDevices};
use whipcast_core::types::PermissionState;

/// Synthetic device selection shared by commands that capture
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Pretend there is no camera
    #[arg(long)]
    pub no_camera: bool,

    /// Pretend there is no microphone
    #[arg(long)]
    pub no_microphone: bool,

    /// Pretend display capture is not supported
    #[arg(long)]
    pub no_screen: bool,

    /// Decline camera and microphone prompts
    #[arg(long)]
    pub deny: bool,
}

impl DeviceArgs {
    /// Synthetic test-pattern devices matching the flags
    pub fn devices(&self) -> SyntheticDevices {
        let user_media_permission = if self.deny {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        };
        SyntheticDevices {
            camera: !self.no_camera,
            microphone: !self.no_microphone,
            display: !self.no_screen,
            user_media_permission,
            ..Default::default()
        }
    }
}

/// Probe capabilities without acquiring anything
pub async fn probe(args: DeviceArgs) -> Result<()> {
    println!("whipcast - Source Availability\n");

    let prober = CapabilityProber::new(Arc::new(args.devices()));
    let report = prober.probe().await;

    println!("{:<12} {}", "Source", "State");
    println!("{}", "-".repeat(28));
    for (kind, availability) in report.iter() {
        println!("{:<12} {}", kind, availability);
    }

    println!("\nNote: screen capture is reported as not allowed until it is requested.");
    Ok(())
}
