use std::time::Duration;

use probe::ProbeOutcome;
use tapedeck::dto::{CreateRecording, UpdateRecording};
use tapedeck::error::AppError;
use tapedeck::recording::RecordingStatus;
use tapedeck::settings::SettingsPatch;

mod common;
use common::{FakeProber, FakeRun, FakeTranscoder, harness, in_secs, wait_for_status, wait_terminal};

fn fast_settings(attempts: i32) -> SettingsPatch {
    SettingsPatch {
        reconnect_attempts: Some(attempts),
        reconnect_delay: Some(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn happy_path_records_and_stitches() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(64_000));
    let h = harness(prober, transcoder.clone(), fast_settings(10)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "A".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(2),
            duration: Some(5),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();
    assert_eq!(view.status, RecordingStatus::Scheduled);

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(15)).await,
        Some(RecordingStatus::Completed)
    );

    let done = h.app.recordings().get(&id).await.unwrap();
    assert_eq!(done.recording.success, Some(true));
    let expected = h.out_dir().join(format!("A_{id}.mp4"));
    assert_eq!(done.recording.output_path.as_deref(), Some(expected.as_path()));
    assert!(expected.is_file());
    assert!(done.recording.completed_at.is_some());
    assert!(done.recording.error_message.is_none());
    assert_eq!(transcoder.captures(), 1);

    // Terminal status never regresses.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let still = h.app.recordings().get(&id).await.unwrap();
    assert_eq!(still.status, RecordingStatus::Completed);
}

#[tokio::test]
async fn waits_for_liveness_before_capturing() {
    let prober = FakeProber::sequence(
        &[
            ProbeOutcome::NotFound,
            ProbeOutcome::NotFound,
            ProbeOutcome::NotFound,
        ],
        ProbeOutcome::Live,
    );
    let transcoder = FakeTranscoder::with_default(FakeRun::full(16_000));
    let h = harness(prober.clone(), transcoder.clone(), fast_settings(10)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "waits".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(6),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    assert!(wait_for_status(&h.app, &id, RecordingStatus::Recording, Duration::from_secs(8)).await);
    // Three dead ticks then the live answer.
    assert_eq!(prober.calls(), 4);

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(10)).await,
        Some(RecordingStatus::Completed)
    );
    assert_eq!(transcoder.captures(), 1);
}

#[tokio::test]
async fn mid_capture_drop_retries_and_stitches() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::scripted(
        &[FakeRun::dies_after(2, 40_000)],
        FakeRun::full(40_000),
    );
    let h = harness(prober, transcoder.clone(), fast_settings(5)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "drop".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(6),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(20)).await,
        Some(RecordingStatus::Completed)
    );
    assert_eq!(transcoder.captures(), 2);

    let done = h.app.recordings().get(&id).await.unwrap();
    assert_eq!(done.recording.success, Some(true));
    let final_path = done.recording.output_path.clone().unwrap();
    let final_size = std::fs::metadata(&final_path).unwrap().len();
    assert!(final_size >= (80_000f64 * 0.9) as u64, "final too small: {final_size}");

    // Attempt files are gone once stitched.
    let leftovers: Vec<_> = std::fs::read_dir(h.out_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_attempt"))
        .collect();
    assert!(leftovers.is_empty(), "leftover attempts: {leftovers:?}");
}

#[tokio::test]
async fn exhausted_retries_keep_partial_data() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::dies_after(1, 10_000));
    let h = harness(prober, transcoder.clone(), fast_settings(2)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "partial".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(30),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(20)).await,
        Some(RecordingStatus::Completed)
    );
    let done = h.app.recordings().get(&id).await.unwrap();
    assert_eq!(done.recording.success, Some(true));
    let message = done.recording.error_message.clone().unwrap();
    assert!(message.contains("partial"), "unexpected message: {message}");
    let final_path = done.recording.output_path.clone().unwrap();
    assert!(final_path.is_file());
    assert_eq!(transcoder.captures(), 2);
}

#[tokio::test]
async fn never_live_fails_with_nothing_on_disk() {
    let prober = FakeProber::always(ProbeOutcome::NotFound);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(1));
    let h = harness(prober, transcoder.clone(), fast_settings(3)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "dead".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(30),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(15)).await,
        Some(RecordingStatus::Failed)
    );
    let done = h.app.recordings().get(&id).await.unwrap();
    assert_eq!(done.recording.success, Some(false));
    assert!(done.recording.output_path.is_none());
    let message = done.recording.error_message.clone().unwrap();
    assert!(message.contains("stream"), "message: {message}");
    assert!(message.contains("live"), "message: {message}");
    assert_eq!(transcoder.captures(), 0);
}

#[tokio::test]
async fn cancel_during_probe_wait() {
    let prober = FakeProber::always(ProbeOutcome::NotFound);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(1));
    let h = harness(prober, transcoder.clone(), fast_settings(-1)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "cancel-me".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(60),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    assert!(wait_for_status(&h.app, &id, RecordingStatus::Starting, Duration::from_secs(5)).await);
    h.app.recordings().stop(&id).await.unwrap();

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(3)).await,
        Some(RecordingStatus::Cancelled)
    );
    let done = h.app.recordings().get(&id).await.unwrap();
    assert_eq!(done.recording.success, Some(false));
    assert_eq!(done.recording.error_message.as_deref(), Some("cancelled"));
    assert_eq!(transcoder.captures(), 0, "no subprocess may be spawned");
}

#[tokio::test]
async fn ignore_probe_skips_liveness_gate() {
    let prober = FakeProber::always(ProbeOutcome::NotFound);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(8_000));
    let h = harness(prober, transcoder.clone(), fast_settings(-1)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "forced".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(3),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();
    h.app.recordings().set_ignore_probe(&id, true).await.unwrap();

    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(10)).await,
        Some(RecordingStatus::Completed)
    );
    assert_eq!(transcoder.captures(), 1);
}

#[tokio::test]
async fn update_only_while_scheduled() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(4_000));
    let h = harness(prober, transcoder.clone(), fast_settings(5)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "edit".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(60),
            duration: Some(3),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    // Editable while scheduled.
    let updated = h
        .app
        .recordings()
        .update(
            &id,
            UpdateRecording {
                name: Some("edited".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.recording.name, "edited");

    // Pulling startTime to now starts it.
    h.app
        .recordings()
        .update(
            &id,
            UpdateRecording {
                start_time: Some(in_secs(0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(10)).await,
        Some(RecordingStatus::Completed)
    );

    // Immutable once finished.
    let err = h
        .app
        .recordings()
        .update(
            &id,
            UpdateRecording {
                name: Some("too late".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn start_is_rejected_outside_scheduled() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(4_000));
    let h = harness(prober, transcoder, fast_settings(5)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "manual".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(3600),
            duration: Some(2),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();

    h.app.recordings().start(&id).await.unwrap();
    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(10)).await,
        Some(RecordingStatus::Completed)
    );
    let err = h.app.recordings().start(&id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn create_validation() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(1));
    let h = harness(prober, transcoder, fast_settings(5)).await;

    let bad_url = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "x".into(),
            rtsp_url: "http://h/s".into(),
            start_time: in_secs(10),
            duration: Some(5),
        })
        .await
        .unwrap_err();
    assert!(matches!(bad_url, AppError::Validation(_)));

    let bad_duration = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "x".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(10),
            duration: Some(0),
        })
        .await
        .unwrap_err();
    assert!(matches!(bad_duration, AppError::Validation(_)));

    let bad_time = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "x".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: "not a time".into(),
            duration: Some(5),
        })
        .await
        .unwrap_err();
    assert!(matches!(bad_time, AppError::Validation(_)));

    let missing = h.app.recordings().get("no-such-id").await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));
}

#[tokio::test]
async fn delete_cancels_and_removes_files() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(32_000));
    let h = harness(prober, transcoder, fast_settings(5)).await;

    let view = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "gone".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(3),
        })
        .await
        .unwrap();
    let id = view.recording.id.clone();
    assert_eq!(
        wait_terminal(&h.app, &id, Duration::from_secs(10)).await,
        Some(RecordingStatus::Completed)
    );
    let output = h
        .app
        .recordings()
        .get(&id)
        .await
        .unwrap()
        .recording
        .output_path
        .unwrap();
    assert!(output.is_file());

    h.app.recordings().delete(&id).await.unwrap();
    assert!(!output.exists());
    assert!(matches!(
        h.app.recordings().get(&id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn stats_count_by_derived_status() {
    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(2_000));
    let h = harness(prober, transcoder, fast_settings(5)).await;

    let scheduled = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "later".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(3600),
            duration: Some(5),
        })
        .await
        .unwrap();
    let done = h
        .app
        .recordings()
        .create(CreateRecording {
            name: "now".into(),
            rtsp_url: "rtsp://h/s".into(),
            start_time: in_secs(0),
            duration: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(
        wait_terminal(&h.app, &done.recording.id, Duration::from_secs(10)).await,
        Some(RecordingStatus::Completed)
    );

    let stats = h.app.recordings().stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.completed, 1);

    // Keep the scheduled one from leaking a timer into other tests.
    h.app.recordings().delete(&scheduled.recording.id).await.unwrap();
}

#[tokio::test]
async fn recovery_restarts_unfinished_and_fails_missed() {
    use tapedeck::model::Recording;

    let prober = FakeProber::always(ProbeOutcome::Live);
    let transcoder = FakeTranscoder::with_default(FakeRun::full(8_000));

    // Seed the recordings document by hand: one recording mid-window, one
    // whose window is long over.
    let dir = tempfile::TempDir::new().unwrap();
    let now = chrono::Utc::now();
    let mut alive = Recording::new(
        "alive".into(),
        "rtsp://h/s".into(),
        now - chrono::Duration::seconds(2),
        6,
    );
    alive.created_at = now - chrono::Duration::seconds(10);
    let mut missed = Recording::new(
        "missed".into(),
        "rtsp://h/s".into(),
        now - chrono::Duration::seconds(3600),
        5,
    );
    missed.created_at = now - chrono::Duration::seconds(7200);
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(
        dir.path().join("data/recordings.json"),
        serde_json::to_vec_pretty(&vec![alive.clone(), missed.clone()]).unwrap(),
    )
    .unwrap();

    let mut config = tapedeck::config::Config::default();
    config.data.recordings_file = dir.path().join("data/recordings.json");
    config.data.streams_file = dir.path().join("data/streams.json");
    config.data.settings_file = dir.path().join("data/settings.json");
    config.data.logs_dir = dir.path().join("logs");
    let app = tapedeck::app::App::with_collaborators(config, prober, transcoder);
    app.update_settings(SettingsPatch {
        output_directory: Some(dir.path().join("recordings")),
        reconnect_delay: Some(1),
        ..Default::default()
    })
    .await
    .unwrap();

    app.recover().await;

    assert_eq!(
        wait_terminal(&app, &missed.id, Duration::from_secs(5)).await,
        Some(RecordingStatus::Failed)
    );
    let missed_view = app.recordings().get(&missed.id).await.unwrap();
    assert_eq!(
        missed_view.recording.error_message.as_deref(),
        Some("missed scheduled start")
    );

    assert_eq!(
        wait_terminal(&app, &alive.id, Duration::from_secs(12)).await,
        Some(RecordingStatus::Completed)
    );
    let alive_view = app.recordings().get(&alive.id).await.unwrap();
    assert_eq!(alive_view.recording.success, Some(true));
}
