//! Source management and preview tests

mod mocks;

use mocks::{CallLog, MockConnectionFactory, MockDevices, MockSignaling};
use std::sync::Arc;
use whipcast_core::capture::{AcquireError, MediaTrack};
use whipcast_core::types::PermissionState;
use whipcast_core::{
    Availability, Phase, Publisher, PublisherConfig, PublisherEvent, SourceKind, StopOutcome,
};

fn publisher_with(devices: MockDevices, config: PublisherConfig) -> (Arc<MockDevices>, Publisher) {
    let log = devices.log.clone();
    let devices = Arc::new(devices);
    let publisher = Publisher::with_transport(
        config,
        devices.clone(),
        Arc::new(MockConnectionFactory::new(log.clone())),
        Arc::new(MockSignaling::new(log)),
    );
    (devices, publisher)
}

fn probe_only() -> PublisherConfig {
    PublisherConfig {
        probe_on_load: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_missing_camera_only_marks_camera() {
    let devices = MockDevices {
        no_video_input: true,
        permission: Some(PermissionState::Granted),
        ..MockDevices::new(CallLog::default())
    };
    let (devices, publisher) = publisher_with(devices, probe_only());

    let report = publisher.load().await;
    assert_eq!(report.camera, Availability::Unavailable);
    assert_eq!(report.microphone, Availability::Working);
    assert_eq!(report.screen, Availability::Denied);
    assert_eq!(publisher.availability(SourceKind::Camera), Availability::Unavailable);

    // Probing never acquires
    assert!(devices.issued().is_empty());
}

#[tokio::test]
async fn test_camera_request_without_video_input() {
    let devices = MockDevices {
        no_video_input: true,
        permission: Some(PermissionState::Granted),
        ..MockDevices::new(CallLog::default())
    };
    let (devices, publisher) = publisher_with(devices, probe_only());
    publisher.load().await;

    assert_eq!(publisher.request_microphone().await, Availability::Working);
    assert_eq!(publisher.request_screen().await, Availability::Working);
    assert_eq!(publisher.request_camera().await, Availability::Unavailable);

    assert_eq!(publisher.availability(SourceKind::Camera), Availability::Unavailable);
    assert_eq!(publisher.availability(SourceKind::Microphone), Availability::Working);
    assert_eq!(publisher.availability(SourceKind::Screen), Availability::Working);

    let view = publisher.sources().view();
    assert!(view.track(SourceKind::Camera).is_none());
    assert!(view.track(SourceKind::Microphone).is_some());
    assert!(view.track(SourceKind::Screen).is_some());
    assert!(devices.issued().iter().all(|t| t.is_live()));
}

#[tokio::test]
async fn test_prompt_state_is_unknown() {
    let devices = MockDevices {
        permission: Some(PermissionState::Prompt),
        ..MockDevices::new(CallLog::default())
    };
    let (_devices, publisher) = publisher_with(devices, probe_only());

    let report = publisher.load().await;
    assert_eq!(report.camera, Availability::Unknown);
    assert_eq!(report.microphone, Availability::Unknown);
}

#[tokio::test]
async fn test_load_acquires_sources() {
    let (devices, publisher) =
        publisher_with(MockDevices::new(CallLog::default()), PublisherConfig::default());
    let mut rx = publisher.subscribe();

    publisher.load().await;
    for kind in SourceKind::ALL {
        assert_eq!(publisher.availability(kind), Availability::Working, "{}", kind);
    }
    assert_eq!(devices.issued().len(), 3);

    let mut working = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PublisherEvent::Availability {
            kind,
            availability: Availability::Working,
        } = event
        {
            working.push(kind);
        }
    }
    assert_eq!(working.len(), 3);
}

#[tokio::test]
async fn test_combined_denial_marks_camera_and_microphone() {
    let devices = MockDevices {
        camera_error: Some(AcquireError::PermissionDenied),
        ..MockDevices::new(CallLog::default())
    };
    let (_devices, publisher) = publisher_with(devices, PublisherConfig::default());

    publisher.load().await;
    assert_eq!(publisher.availability(SourceKind::Camera), Availability::Denied);
    assert_eq!(publisher.availability(SourceKind::Microphone), Availability::Denied);
    assert_eq!(publisher.availability(SourceKind::Screen), Availability::Working);
}

#[tokio::test]
async fn test_request_replaces_previous_track() {
    let (devices, publisher) = publisher_with(MockDevices::new(CallLog::default()), probe_only());

    assert_eq!(publisher.request_camera().await, Availability::Working);
    assert_eq!(publisher.request_camera().await, Availability::Working);

    let tracks = devices.issued();
    assert_eq!(tracks.len(), 2);
    assert!(!tracks[0].is_live());
    assert!(tracks[1].is_live());
}

#[tokio::test]
async fn test_screen_request_without_display_capture() {
    let devices = MockDevices {
        no_display: true,
        ..MockDevices::new(CallLog::default())
    };
    let (devices, publisher) = publisher_with(devices, probe_only());

    assert_eq!(publisher.request_screen().await, Availability::Unavailable);
    assert_eq!(devices.display_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_screen_denied_request() {
    let devices = MockDevices {
        screen_error: Some(AcquireError::PermissionDenied),
        ..MockDevices::new(CallLog::default())
    };
    let (_devices, publisher) = publisher_with(devices, probe_only());

    assert_eq!(publisher.request_screen().await, Availability::Denied);
    assert!(publisher.sources().view().track(SourceKind::Screen).is_none());
}

#[tokio::test]
async fn test_publish_leaves_source_tracks_alone() {
    let (devices, publisher) =
        publisher_with(MockDevices::new(CallLog::default()), PublisherConfig::default());
    publisher.load().await;
    let held: Vec<_> = devices.issued();
    assert_eq!(held.len(), 3);

    publisher.start("room-1").await.unwrap();
    assert_eq!(publisher.phase(), Phase::Publishing);
    assert!(held.iter().all(|t| t.is_live()));

    // Stopping the session releases the independently held sources too
    assert_eq!(publisher.stop().await, StopOutcome::Stopped);
    assert!(held.iter().all(|t| !t.is_live()));
    assert!(publisher.sources().view().track(SourceKind::Camera).is_none());
}

#[tokio::test]
async fn test_release_all_is_idempotent() {
    let (devices, publisher) =
        publisher_with(MockDevices::new(CallLog::default()), PublisherConfig::default());
    publisher.load().await;

    publisher.sources().release_all();
    publisher.sources().release_all();
    for track in devices.issued() {
        assert_eq!(track.stops(), 1);
    }
}

#[tokio::test]
async fn test_preview_visibility() {
    let (_devices, publisher) = publisher_with(MockDevices::new(CallLog::default()), probe_only());
    let mut rx = publisher.subscribe();

    assert!(!publisher.preview().is_visible());
    assert!(publisher.toggle_preview());
    assert!(publisher.preview().output_track().is_some());

    // Showing an already visible preview changes nothing
    publisher.set_preview_visible(true);
    assert!(!publisher.toggle_preview());
    assert!(publisher.preview().output_track().is_none());

    let mut visibility = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PublisherEvent::Preview { visible } = event {
            visibility.push(visible);
        }
    }
    assert_eq!(visibility, vec![true, false]);
}

#[tokio::test]
async fn test_unload_releases_everything() {
    let (devices, publisher) =
        publisher_with(MockDevices::new(CallLog::default()), PublisherConfig::default());
    publisher.load().await;
    publisher.set_preview_visible(true);

    publisher.unload();
    assert!(devices.issued().iter().all(|t| !t.is_live()));
    assert!(!publisher.preview().is_visible());
}
