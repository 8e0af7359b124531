mod common;

use std::fs;

use common::test_config;
use golfvision::config::{load_config, load_config_from_str};
use golfvision::{ConfigError, Coordinates, GolfVision, JobStatus};

const FULL_CONFIG: &str = r#"{
    "version": "1.0",
    "output_directory": "/srv/golfvision/videos",
    "base_url": "https://videos.example.com",
    "publisher": { "channel_capacity": 16 },
    "enrichment": {
        "enabled": false,
        "request_timeout_secs": 3,
        "default_coordinates": [36.5683, -121.9497]
    },
    "engines": {
        "render": {
            "program": "/opt/blender/blender",
            "args": ["-b", "{input}", "--python", "{script}"],
            "timeout_secs": 600
        }
    },
    "video": { "fps": 24, "width": 1280, "height": 720, "seconds_per_hole": 2.5 },
    "retry": { "max_attempts": 3, "initial_delay_ms": 500 },
    "errors": { "retention_days": 7, "sweep_interval_hours": 6 },
    "supervisor": { "orphan_sweep": false }
}"#;

#[test]
fn test_full_config_round_trips_through_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("golfvision.json");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.base_url, "https://videos.example.com");
    assert_eq!(config.publisher.channel_capacity, 16);
    assert!(!config.enrichment.enabled);
    assert_eq!(
        config.enrichment.default_coordinates,
        Coordinates::new(36.5683, -121.9497)
    );
    assert_eq!(config.engines.render.program, "/opt/blender/blender");
    assert_eq!(config.engines.render.timeout_secs, 600);
    // Unlisted engines keep their defaults.
    assert_eq!(config.engines.probe.program, "ffprobe");
    assert_eq!(config.video.fps, 24);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.initial_delay_ms, 500);
    assert_eq!(config.errors.retention_days, 7);
    assert!(!config.supervisor.orphan_sweep);
}

#[test]
fn test_rejects_unsupported_version() {
    let err = load_config_from_str(r#"{ "version": "2.0" }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Validation { .. }));
}

#[test]
fn test_rejects_excessive_retry_budget() {
    let err = load_config_from_str(r#"{ "version": "1.0", "retry": { "max_attempts": 50 } }"#)
        .unwrap_err();
    match err {
        ConfigError::Validation { message } => assert!(message.contains("max_attempts")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_service_wires_production_engines_offline() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let service = GolfVision::from_config(config).unwrap();
    assert_eq!(service.counts().unwrap().total, 0);
    assert_eq!(service.supervisor().running_count(), 0);
    assert!(service.error_stats().total == 0);
    service.shutdown().unwrap();
}

#[tokio::test]
async fn test_missing_engine_binary_fails_job_at_build() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.engines.model.program = "golfvision-test-no-such-binary".to_string();

    let service = GolfVision::from_config(config).unwrap();
    let job = service
        .submit(golfvision::SubmitRequest::new("Pebble Beach Golf Links"))
        .unwrap();
    service.wait_idle().await;

    let done = service.get(&job.id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.errors[0].starts_with("building_model failed"));
    // Offline enrichment: everything past the gazetteer fell back.
    assert_eq!(done.fallbacks.len(), 4);
    assert_eq!(done.coordinates, Some(Coordinates::new(36.5683, -121.9497)));
    // Providers that are simply not wired raise no warnings.
    let warnings = service.query_errors(&golfvision::recorder::ErrorQuery {
        kind: Some(golfvision::ReportKind::Warning),
        ..Default::default()
    });
    assert!(warnings.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_engine_timeout_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.engines.model.program = "sh".to_string();
    config.engines.model.args = vec!["-c".to_string(), "sleep 5".to_string()];
    config.engines.model.timeout_secs = 1;
    config.retry.max_attempts = 1;

    let service = GolfVision::from_config(config).unwrap();
    let mut rx = service.subscribe_all();
    let started = std::time::Instant::now();
    let job = service
        .submit(golfvision::SubmitRequest::new("Pebble Beach Golf Links"))
        .unwrap();
    service.wait_idle().await;
    assert!(started.elapsed() < std::time::Duration::from_secs(4));

    let done = service.get(&job.id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.errors.len(), 1);
    assert!(done.errors[0].starts_with("building_model failed"));
    assert!(done.errors[0].contains("timed out after 1s"));
    assert_eq!(service.supervisor().running_count(), 0);

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let golfvision::JobEvent::Update(snapshot) = event {
            seen.push(snapshot.status);
        }
    }
    assert!(seen.contains(&JobStatus::BuildingModel));
    assert!(!seen.contains(&JobStatus::Rendering));
}

#[test]
fn test_rejects_out_of_range_sweep_interval() {
    let err = load_config_from_str(
        r#"{"version":"1.0","errors":{"sweep_interval_hours":18446744073709551615}}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("sweep_interval_hours"));
}

#[tokio::test]
async fn test_service_accepts_unvalidated_sweep_intervals() {
    let dir = tempfile::tempdir().unwrap();
    for hours in [u64::MAX, 0] {
        let mut config = test_config(dir.path());
        config.errors.sweep_interval_hours = hours;
        let service = GolfVision::from_config(config).unwrap();
        service.shutdown().unwrap();
    }
}

#[test]
fn test_service_requires_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let err = GolfVision::from_config(test_config(dir.path())).err().unwrap();
    assert!(err.to_string().contains("Tokio runtime"));
}
