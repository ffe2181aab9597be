mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use reel_comfyui::history::{ArtifactResult, JobKind};
use reel_comfyui::workflow::{build_image_graph, Graph};
use reel_events::bus::{JOB_PROGRESS, JOB_SUCCEEDED};
use reel_events::EventBus;
use reel_pipeline::clock::ManualClock;
use reel_pipeline::error::PipelineError;
use reel_pipeline::poller::JobState;
use reel_pipeline::reporter::ProgressReporter;

use common::{poller, JobScript, MockTransport, Outcome};

fn graph() -> Graph {
    build_image_graph("a lighthouse at dusk", 7, 512, 512, "dreamshaper_8.safetensors").unwrap()
}

fn setup(transport: MockTransport) -> (Arc<MockTransport>, Arc<ManualClock>) {
    (Arc::new(transport), Arc::new(ManualClock::new()))
}

#[tokio::test]
async fn video_job_succeeds_after_leaving_the_queue() {
    let (transport, clock) = setup(MockTransport::always_video(2));
    let poller = poller(transport.clone(), clock.clone());

    let (job_id, artifact) = poller.run(graph(), JobKind::Video, None).await.unwrap();

    assert_eq!(job_id.as_str(), "job-1");
    assert_matches!(artifact, ArtifactResult::Video(r) if r.filename == "reel_job-1.mp4");
    assert_eq!(transport.queue_calls.load(Ordering::SeqCst), 3);
    assert_eq!(transport.history_calls.load(Ordering::SeqCst), 1);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(1_500); 2]);
}

#[tokio::test]
async fn succeeded_state_is_sticky() {
    let (transport, clock) = setup(MockTransport::always_video(1));
    let poller = poller(transport.clone(), clock);

    let handle = poller.submit(graph(), JobKind::Video).await.unwrap();
    let mut tracker = poller.track(handle);
    while !tracker.state().is_terminal() {
        tracker.poll_once().await.unwrap();
    }
    let first = tracker.state().clone();
    let grace_used = tracker.grace_attempts_used();
    let queue_calls = transport.queue_calls.load(Ordering::SeqCst);
    let history_calls = transport.history_calls.load(Ordering::SeqCst);

    for _ in 0..3 {
        let state = tracker.poll_once().await.unwrap();
        assert_eq!(*state, first);
    }

    assert_matches!(first, JobState::Succeeded(_));
    assert_eq!(tracker.grace_attempts_used(), grace_used);
    assert_eq!(transport.queue_calls.load(Ordering::SeqCst), queue_calls);
    assert_eq!(transport.history_calls.load(Ordering::SeqCst), history_calls);
    assert_eq!(tracker.current_progress().percent, 100.0);
}

#[tokio::test]
async fn late_history_is_picked_up_inside_the_grace_window() {
    let (transport, clock) =
        setup(MockTransport::new(|_, _| JobScript::video(0).with_history_misses(2)));
    let poller = poller(transport.clone(), clock.clone());

    let handle = poller.submit(graph(), JobKind::Video).await.unwrap();
    let mut tracker = poller.track(handle);

    let state = tracker.poll_once().await.unwrap().clone();
    assert_matches!(state, JobState::Ambiguous(_));
    while !tracker.state().is_terminal() {
        tracker.poll_once().await.unwrap();
    }

    assert_matches!(tracker.state(), JobState::Succeeded(ArtifactResult::Video(_)));
    assert_eq!(tracker.grace_attempts_used(), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);
}

#[tokio::test]
async fn out_of_memory_is_rewritten_into_remediation() {
    let (transport, clock) = setup(MockTransport::new(|_, _| {
        JobScript::error("CUDA error: the device ran out of memory while allocating 3.2 GiB")
    }));
    let poller = poller(transport, clock);

    let err = poller.run(graph(), JobKind::Video, None).await.unwrap_err();

    assert_matches!(err, PipelineError::BackendExecution { ref message, out_of_memory: true } => {
        assert!(message.contains("Reduce the frame count or resolution"));
        assert!(!message.contains("3.2 GiB"));
    });
}

#[tokio::test]
async fn other_backend_errors_pass_through() {
    let (transport, clock) =
        setup(MockTransport::new(|_, _| JobScript::error("Value not in list: sampler_name")));
    let poller = poller(transport, clock);

    let err = poller.run(graph(), JobKind::Video, None).await.unwrap_err();

    assert_matches!(err, PipelineError::BackendExecution { message, out_of_memory: false } => {
        assert!(message.contains("Value not in list: sampler_name"));
    });
}

#[tokio::test]
async fn exhausted_grace_window_reports_no_output() {
    let (transport, clock) = setup(MockTransport::new(|_, _| JobScript {
        running_polls: 0,
        history_misses: 0,
        outcome: Outcome::Never,
    }));
    let poller = poller(transport.clone(), clock.clone());

    let err = poller.run(graph(), JobKind::Video, None).await.unwrap_err();

    assert_matches!(err, PipelineError::NoArtifact(msg) if msg == "no output produced");
    assert_eq!(transport.history_calls.load(Ordering::SeqCst), 5);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 4]);
}

#[tokio::test]
async fn recorded_job_without_outputs_suggests_configuration_fix() {
    let (transport, clock) = setup(MockTransport::new(|_, _| JobScript {
        running_polls: 1,
        history_misses: 0,
        outcome: Outcome::Empty,
    }));
    let poller = poller(transport, clock);

    let err = poller.run(graph(), JobKind::Video, None).await.unwrap_err();

    assert_matches!(err, PipelineError::NoArtifact(msg) if msg.contains("output node"));
}

#[tokio::test]
async fn image_jobs_time_out_after_bounded_polls() {
    let (transport, clock) = setup(MockTransport::new(|_, _| JobScript::image(u32::MAX)));
    let poller = poller(transport.clone(), clock);

    let err = poller.run(graph(), JobKind::Image, None).await.unwrap_err();

    assert_matches!(err, PipelineError::Timeout(_));
    assert_eq!(transport.queue_calls.load(Ordering::SeqCst), 120);
    assert_eq!(transport.history_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn video_progress_is_published_while_running() {
    let (transport, clock) = setup(MockTransport::always_video(3));
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let poller = poller(transport, clock).with_reporter(ProgressReporter::new(bus, "run-1"));

    poller.run(graph(), JobKind::Video, Some(0)).await.unwrap();

    let mut percents = Vec::new();
    let mut succeeded = false;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.run_id.as_deref(), Some("run-1"));
        if event.event_type == JOB_PROGRESS {
            assert_eq!(event.scene_index, Some(0));
            percents.push(event.payload["progress"]["percent"].as_f64().unwrap());
        } else if event.event_type == JOB_SUCCEEDED {
            succeeded = true;
        }
    }
    assert_eq!(percents.len(), 3);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert!(percents.iter().all(|p| *p <= 95.0));
    assert!(succeeded);
}
