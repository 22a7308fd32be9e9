//! Mixed-reality controller tests through a running client.

mod common;

use std::time::Duration;

use glam::{DMat4, DVec3};
use rstest::rstest;

use common::{base_config, ClientHarness};
use varjo_mr_client::backend::{DummyCommand, LoadOp};
use varjo_mr_client::chroma_key::{create_config_hsv, rgb_to_hsv};
use varjo_mr_client::runtime::{
    CameraPropertyMode, CameraPropertyType, CameraPropertyValue, ChromaKeyConfig, CubemapMode,
    Event, LayerFlags, LockType, MrDeviceStatus, RuntimeCall,
};
use varjo_mr_client::{ClientConfig, ClientError, ErrorKind, Runtime};

fn mr_config() -> ClientConfig {
    ClientConfig {
        render_vst: true,
        ..base_config()
    }
}

/// Calls that touch the camera configuration, in order.
fn camera_calls(calls: Vec<RuntimeCall>) -> Vec<RuntimeCall> {
    calls
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                RuntimeCall::Lock(LockType::Camera, _)
                    | RuntimeCall::Unlock(LockType::Camera)
                    | RuntimeCall::SetCameraPropertyMode(..)
                    | RuntimeCall::SetCameraPropertyValue(..)
                    | RuntimeCall::ResetCameraProperties
            )
        })
        .collect()
}

/// Color the layer was cleared to in the most recent frame.
fn layer_clear_color(harness: &ClientHarness) -> [f32; 4] {
    harness
        .recorder
        .commands()
        .into_iter()
        .rev()
        .find_map(|c| match c {
            DummyCommand::BeginPass {
                load: LoadOp::Clear(values),
                ..
            } => Some(values.color),
            _ => None,
        })
        .expect("a frame was rendered")
}

// ============================================================================
// Camera
// ============================================================================

#[test]
fn test_camera_writes_hold_the_lock() {
    let harness = ClientHarness::new(mr_config());
    let camera = harness.client.camera();
    harness.runtime.clear_calls();

    camera
        .set_mode(CameraPropertyType::ExposureTime, CameraPropertyMode::Manual)
        .unwrap();
    camera
        .set_value(
            CameraPropertyType::ExposureTime,
            CameraPropertyValue::Double(10000.0),
        )
        .unwrap();
    camera.reset_properties_to_defaults().unwrap();

    assert_eq!(
        camera_calls(harness.runtime.calls()),
        vec![
            RuntimeCall::Lock(LockType::Camera, true),
            RuntimeCall::SetCameraPropertyMode(
                CameraPropertyType::ExposureTime,
                CameraPropertyMode::Manual
            ),
            RuntimeCall::Unlock(LockType::Camera),
            RuntimeCall::Lock(LockType::Camera, true),
            RuntimeCall::SetCameraPropertyValue(
                CameraPropertyType::ExposureTime,
                CameraPropertyValue::Double(10000.0)
            ),
            RuntimeCall::Unlock(LockType::Camera),
            RuntimeCall::Lock(LockType::Camera, true),
            RuntimeCall::ResetCameraProperties,
            RuntimeCall::Unlock(LockType::Camera),
        ]
    );
    assert!(!harness.runtime.client_holds_lock(LockType::Camera));
}

/// A write while another client holds the camera lock changes nothing.
#[test]
fn test_camera_write_rejected_under_foreign_lock() {
    let mut harness = ClientHarness::new(mr_config());
    harness
        .client
        .camera()
        .set_mode(CameraPropertyType::ExposureTime, CameraPropertyMode::Manual)
        .unwrap();
    harness
        .client
        .camera()
        .set_value(
            CameraPropertyType::ExposureTime,
            CameraPropertyValue::Double(5000.0),
        )
        .unwrap();
    harness.step();
    assert_eq!(
        harness
            .client
            .camera()
            .property_as_string(CameraPropertyType::ExposureTime),
        "5000.00"
    );

    harness.runtime.hold_lock_as_other_client(LockType::Camera);
    harness.runtime.clear_calls();
    let err = harness
        .client
        .camera()
        .set_value(
            CameraPropertyType::ExposureTime,
            CameraPropertyValue::Double(10000.0),
        )
        .unwrap_err();
    assert!(matches!(err, ClientError::LockRejected(LockType::Camera)));
    assert_eq!(err.kind(), ErrorKind::LockRejected);
    assert!(!err.is_fatal());

    assert_eq!(harness.runtime.pending_event_count(), 0);
    assert_eq!(
        camera_calls(harness.runtime.calls()),
        vec![RuntimeCall::Lock(LockType::Camera, false)]
    );
    harness.step();
    let info = harness
        .client
        .camera()
        .property_info(CameraPropertyType::ExposureTime)
        .unwrap();
    assert_eq!(info.current_mode, Some(CameraPropertyMode::Manual));
    assert_eq!(info.current_value, Some(CameraPropertyValue::Double(5000.0)));

    harness.runtime.release_other_client_lock(LockType::Camera);
    harness
        .client
        .camera()
        .set_value(
            CameraPropertyType::ExposureTime,
            CameraPropertyValue::Double(10000.0),
        )
        .unwrap();
    harness.step();
    assert_eq!(
        harness
            .client
            .camera()
            .property_as_string(CameraPropertyType::ExposureTime),
        "10000.00"
    );
}

#[rstest]
#[case::exposure(CameraPropertyType::ExposureTime)]
#[case::iso(CameraPropertyType::IsoValue)]
#[case::white_balance(CameraPropertyType::WhiteBalance)]
fn test_cycling_reaches_manual(#[case] property: CameraPropertyType) {
    let mut harness = ClientHarness::new(mr_config());
    harness
        .client
        .camera()
        .apply_next_mode_or_value(property)
        .unwrap();
    harness.step();
    let info = harness.client.camera().property_info(property).unwrap();
    assert_eq!(info.current_mode, Some(CameraPropertyMode::Manual));
    assert!(info.current_value.is_some());
}

// ============================================================================
// Chroma key
// ============================================================================

/// HSV key over pure green shows the layer's clear color.
#[test]
fn test_chroma_key_composites_layer_over_green() {
    let mut harness = ClientHarness::new(ClientConfig {
        chroma_key_enabled: true,
        ..mr_config()
    });
    let config = create_config_hsv(
        DVec3::new(0.355, 1.0, 1.0),
        DVec3::new(0.15, 0.60, 0.92),
        DVec3::new(0.03, 0.03, 0.03),
    );
    harness.client.chroma_key_mut().reset_all().unwrap();
    harness.client.chroma_key_mut().set_config(0, config).unwrap();
    assert_eq!(harness.client.chroma_key().config(0).unwrap(), config);
    if let ChromaKeyConfig::Hsv(params) = harness.client.chroma_key().config(0).unwrap() {
        assert_eq!(params.target_color.x.to_bits(), 0.355f64.to_bits());
        assert_eq!(params.falloff.z.to_bits(), 0.03f64.to_bits());
    } else {
        panic!("slot 0 lost its HSV config");
    }

    harness.step();
    let flags = harness.runtime.last_submit().unwrap().layers[0].flags;
    assert!(flags.contains(LayerFlags::CHROMA_KEY_MASKING));

    let layer = layer_clear_color(&harness);
    let shown = harness.runtime.composite_pixel(layer, [0.0, 1.0, 0.0]);
    for c in 0..3 {
        assert!((shown[c] - layer[c]).abs() < 1e-6);
    }

    // Outside the key the camera image stays.
    let red = [1.0, 0.0, 0.0];
    assert_eq!(harness.runtime.composite_pixel(layer, red), red);
}

#[rstest]
#[case::exact([0.2, 0.8, 0.3], true)]
#[case::green_off_by_one_percent([0.2, 0.81, 0.3], false)]
#[case::red_off([0.21, 0.8, 0.3], false)]
fn test_zero_tolerance_keys_only_target(#[case] video: [f32; 3], #[case] keyed: bool) {
    let mut harness = ClientHarness::new(ClientConfig {
        chroma_key_enabled: true,
        ..mr_config()
    });
    let target = rgb_to_hsv(DVec3::new(0.2f32 as f64, 0.8f32 as f64, 0.3f32 as f64));
    let chroma = harness.client.chroma_key_mut();
    chroma.reset_all().unwrap();
    chroma
        .set_config(0, create_config_hsv(target, DVec3::ZERO, DVec3::ZERO))
        .unwrap();
    harness.step();

    let layer = layer_clear_color(&harness);
    let shown = harness.runtime.composite_pixel(layer, video);
    let expected = if keyed {
        [layer[0], layer[1], layer[2]]
    } else {
        video
    };
    assert_eq!(shown, expected);
}

#[test]
fn test_chroma_key_toggle_follows_session() {
    let mut harness = ClientHarness::new(ClientConfig {
        chroma_key_enabled: true,
        ..mr_config()
    });
    harness.step();
    assert!(harness.runtime.mr_state().chroma_key);

    harness.client.chroma_key_mut().toggle_chroma_keying(false).unwrap();
    assert!(!harness.client.chroma_key().is_keying_enabled());
    assert!(!harness.runtime.mr_state().chroma_key);
}

// ============================================================================
// Markers
// ============================================================================

#[test]
fn test_marker_outlives_observation_by_two_seconds() {
    let mut harness = ClientHarness::new(ClientConfig {
        use_markers: true,
        ..mr_config()
    });
    harness
        .runtime
        .observe_marker(150, DMat4::from_translation(DVec3::new(0.0, 1.0, -1.0)), (0.1, 0.1));
    harness.step();
    assert_eq!(harness.client.markers().unwrap().markers().len(), 1);

    harness.runtime.advance_clock(Duration::from_millis(1900));
    harness.step();
    assert_eq!(harness.client.markers().unwrap().markers().len(), 1);

    harness.runtime.advance_clock(Duration::from_millis(200));
    harness.step();
    assert!(harness.client.markers().unwrap().markers().is_empty());
}

/// Predicted markers are extrapolated to the display time of the frame they are drawn in.
#[test]
fn test_marker_prediction_targets_rendered_frame() {
    let mut harness = ClientHarness::new(ClientConfig {
        use_markers: true,
        ..mr_config()
    });
    harness.step();

    let seen = harness.runtime.current_time();
    harness.runtime.observe_moving_marker(
        151,
        DMat4::IDENTITY,
        DVec3::new(1.0, 0.0, 0.0),
        (0.1, 0.1),
    );
    harness.step();

    let display = harness
        .client
        .engine()
        .unwrap()
        .view()
        .frame_info()
        .unwrap()
        .display_time;
    assert!(display > seen);
    let markers = harness.client.markers().unwrap().markers();
    assert_eq!(markers.len(), 1);
    assert!(markers[0].predicted);
    let expected = (display - seen) as f64 * 1e-9;
    assert!((markers[0].pose.w_axis.x - expected).abs() < 1e-9);
}

#[test]
fn test_locked_markers_survive_timeout() {
    let mut harness = ClientHarness::new(ClientConfig {
        use_markers: true,
        ..mr_config()
    });
    harness
        .runtime
        .observe_marker(151, DMat4::IDENTITY, (0.2, 0.2));
    harness.step();
    assert!(harness.client.markers_mut().unwrap().toggle_lock());

    harness.runtime.advance_clock(Duration::from_secs(3));
    harness.step();
    let markers = harness.client.markers().unwrap().markers();
    assert_eq!(markers.len(), 1);
    assert!(markers[0].predicted);
}

// ============================================================================
// MR session
// ============================================================================

#[rstest]
#[case::reacting(true)]
#[case::ignoring(false)]
fn test_connection_events_toggle_video(#[case] react: bool) {
    let mut harness = ClientHarness::new(ClientConfig {
        react_to_connection_events: react,
        ..mr_config()
    });
    harness.step();
    assert!(harness.runtime.mr_state().video_render);

    harness.runtime.set_mr_connected(false);
    harness.step();
    assert_eq!(harness.runtime.mr_state().video_render, !react);
    assert_eq!(
        harness.runtime.last_submit().unwrap().layers[0]
            .flags
            .contains(LayerFlags::ALPHA_BLEND),
        !react
    );

    harness.runtime.set_mr_connected(true);
    harness.step();
    assert!(harness.runtime.mr_state().video_render);
    assert!(harness.client.mr_session().video_rendering());
}

#[test]
fn test_disconnect_event_is_not_fatal() {
    let mut harness = ClientHarness::new(mr_config());
    harness
        .runtime
        .push_event(Event::MrDeviceStatus(MrDeviceStatus::Disconnected));
    harness.step();
    assert_eq!(harness.client.frames_rendered(), 1);
}

#[test]
fn test_cubemap_mode_applied_at_startup() {
    let harness = ClientHarness::new(ClientConfig {
        cubemap_mode: CubemapMode::AutoAdapt,
        ..mr_config()
    });
    assert_eq!(harness.runtime.mr_state().cubemap.mode, CubemapMode::AutoAdapt);
    assert_eq!(
        harness
            .runtime
            .count_calls(|c| *c == RuntimeCall::SetEnvironmentCubemapConfig(CubemapMode::AutoAdapt)),
        1
    );
}
