// Integration tests for the voice session engine
//
// These drive the engine end to end against an in-memory server and
// microphone, with tokio's clock paused so the shutdown deadline is exact.

mod common;

use anyhow::Result;
use common::{session_started, session_stopped, wait_for, wait_for_state, FakeMicrophone, FakeServer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use talkie::{
    CaptureChunk, CaptureError, Engine, EngineConfig, EngineError, EngineHandle, Inbound,
    Notification, SessionState, Speaker,
};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::Instant;

fn spawn(server: &FakeServer, mic: &FakeMicrophone, config: EngineConfig) -> EngineHandle {
    Engine::spawn(config, Arc::new(server.clone()), Arc::new(mic.clone()))
}

/// Start a session and wait until the server acknowledged it
async fn connect(
    server: &FakeServer,
    mic: &FakeMicrophone,
    config: EngineConfig,
) -> Result<(EngineHandle, broadcast::Receiver<Notification>)> {
    let engine = spawn(server, mic, config);
    let mut notifications = engine.subscribe();

    assert_eq!(engine.start().await?, SessionState::Connecting);
    assert!(server.push_event(session_started("s1")));
    wait_for_state(&mut notifications, SessionState::Connected).await;

    Ok((engine, notifications))
}

fn chunk(len: usize) -> CaptureChunk {
    CaptureChunk {
        samples: vec![100; len],
        sample_rate: 16000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_sends_session_start_and_captures() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();

    let (engine, _notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    assert_eq!(server.connects(), 1);
    assert_eq!(server.directive_names(), vec!["SessionStart"]);
    assert!(mic.is_capturing());

    let status = engine.status().await?;
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.session_id.as_deref(), Some("s1"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_residual_as_padded_frame() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::new(vec![chunk(2500), chunk(1500)]);

    let (engine, _notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    assert_eq!(engine.stop().await?, SessionState::Disconnecting);
    assert!(!mic.is_capturing());

    let frames = server.frames();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.len() == 1600));

    // 800 real samples then 800 zeros
    let last = &frames[2];
    assert!(last.samples[..800].iter().all(|&s| s == 100));
    assert!(last.samples[800..].iter().all(|&s| s == 0));

    assert_eq!(server.directive_names(), vec!["SessionStart", "SessionStop"]);
    assert_eq!(engine.status().await?.frames_sent, 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_audio_sends_closing_silence() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();

    let (engine, _notifications) = connect(&server, &mic, EngineConfig::default()).await?;
    engine.stop().await?;

    // 50 ms at 16 kHz
    let frames = server.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), 800);
    assert!(frames[0].samples.iter().all(|&s| s == 0));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_session_stopped_before_deadline_reaches_idle_once() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    let stopped_at = Instant::now();
    engine.stop().await?;
    wait_for_state(&mut notifications, SessionState::Disconnecting).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(server.push_event(session_stopped("s1")));
    wait_for_state(&mut notifications, SessionState::Idle).await;
    assert!(stopped_at.elapsed() < Duration::from_millis(5000));

    // Let the cancelled deadline pass
    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut transitions = 0;
    while let Ok(notification) = notifications.try_recv() {
        if matches!(notification, Notification::StateChanged { .. }) {
            transitions += 1;
        }
    }
    assert_eq!(transitions, 0);

    let status = engine.status().await?;
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.last_error, None);
    assert_eq!(server.closes(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_session_stopped_forces_idle_after_deadline() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    let stopped_at = Instant::now();
    engine.stop().await?;
    wait_for_state(&mut notifications, SessionState::Idle).await;

    assert!(stopped_at.elapsed() >= Duration::from_millis(5000));
    assert_eq!(server.closes(), 1);

    // Connection is gone, so a late acknowledgement cannot reach the engine
    assert!(!server.push_event(session_stopped("s1")));

    let status = engine.status().await?;
    assert_eq!(status.state, SessionState::Idle);
    assert!(status.last_error.unwrap().contains("5000"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_custom_shutdown_timeout() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let mut config = EngineConfig::default();
    config.session.shutdown_timeout_ms = 300;

    let (engine, mut notifications) = connect(&server, &mic, config).await?;

    let stopped_at = Instant::now();
    engine.stop().await?;
    wait_for_state(&mut notifications, SessionState::Idle).await;

    let elapsed = stopped_at.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(5000));

    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_returns_to_idle() -> Result<()> {
    let server = FakeServer::new();
    let engine = spawn(&server, &FakeMicrophone::denied(), EngineConfig::default());

    let result = engine.start().await;
    assert!(matches!(
        result,
        Err(EngineError::Capture(CaptureError::PermissionDenied(_)))
    ));

    let status = engine.status().await?;
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(server.connects(), 0);

    Ok(())
}

#[tokio::test]
async fn test_connect_failure_ends_in_error() -> Result<()> {
    let server = FakeServer::refusing();
    let engine = spawn(&server, &FakeMicrophone::default(), EngineConfig::default());

    let result = engine.start().await;
    assert!(matches!(result, Err(EngineError::Transport(_))));
    assert_eq!(engine.status().await?.state, SessionState::Error);

    // Retry is allowed from Error
    assert!(matches!(engine.start().await, Err(EngineError::Transport(_))));

    Ok(())
}

#[tokio::test]
async fn test_transport_error_stops_capture() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    assert!(server.push(Inbound::Error("connection reset".to_string())));
    wait_for_state(&mut notifications, SessionState::Error).await;

    assert!(!mic.is_capturing());
    assert_eq!(server.closes(), 1);
    assert!(engine.status().await?.last_error.is_some());

    // Nothing is flushed on the error path
    assert!(server.frames().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_commands_outside_their_state_are_rejected() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let engine = spawn(&server, &mic, EngineConfig::default());

    assert!(matches!(
        engine.stop().await,
        Err(EngineError::InvalidState(SessionState::Idle))
    ));

    let mut notifications = engine.subscribe();
    engine.start().await?;
    assert!(matches!(
        engine.start().await,
        Err(EngineError::InvalidState(SessionState::Connecting))
    ));

    server.push_event(session_started("s1"));
    wait_for_state(&mut notifications, SessionState::Connected).await;
    assert!(matches!(
        engine.start().await,
        Err(EngineError::InvalidState(SessionState::Connected))
    ));

    Ok(())
}

#[tokio::test]
async fn test_server_initiated_stop() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (_engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    server.push_event(session_stopped("s1"));
    wait_for_state(&mut notifications, SessionState::Idle).await;

    assert!(!mic.is_capturing());
    assert_eq!(server.closes(), 1);

    Ok(())
}

#[tokio::test]
async fn test_streamed_turns_reach_transcript() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    server.push_event(json!({"event": "AudioTranscript", "payload": {"session_id": "s1", "text": "find ", "finished": false}}));
    server.push_event(json!({"event": "AudioTranscript", "payload": {"session_id": "s1", "text": "rust", "finished": false}}));
    server.push_event(json!({"event": "AudioTranscript", "payload": {"session_id": "s1", "text": "", "finished": true}}));

    server.push_event(json!({"event": "ResponseText", "payload": {
        "session_id": "s1", "text": null, "finished": false,
        "tool_calls": [{"index": 0, "id": "", "function": {"arguments": "{\"a\":", "name": "search"}, "type": "function"}]
    }}));
    server.push_event(json!({"event": "ResponseText", "payload": {
        "session_id": "s1", "text": null, "finished": false,
        "tool_calls": [{"index": 0, "id": "call_1", "function": {"arguments": "1}", "name": null}, "type": "function"}]
    }}));
    server.push_event(json!({"event": "ResponseText", "payload": {"session_id": "s1", "text": null, "finished": true}}));

    let Notification::Turn(user) =
        wait_for(&mut notifications, |n| matches!(n, Notification::Turn(_))).await
    else {
        unreachable!()
    };
    assert_eq!(user.speaker, Speaker::User);
    assert_eq!(user.content, "find rust");

    let Notification::Turn(reply) =
        wait_for(&mut notifications, |n| matches!(n, Notification::Turn(_))).await
    else {
        unreachable!()
    };
    assert_eq!(reply.speaker, Speaker::Assistant);
    assert_eq!(reply.tool_calls.len(), 1);
    assert_eq!(reply.tool_calls[0].id, "call_1");
    assert_eq!(reply.tool_calls[0].name.as_deref(), Some("search"));
    assert_eq!(reply.tool_calls[0].arguments, "{\"a\":1}");

    let transcript = engine.transcript().await?;
    assert_eq!(transcript.len(), 2);
    assert_eq!(engine.status().await?.turns_count, 2);

    Ok(())
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    server.push(Inbound::Text("{not json".to_string()));
    server.push_event(json!({"event": "Mystery", "payload": {}}));
    server.push_event(json!({"event": "AudioTranscript", "payload": {"session_id": "s1", "text": "still here", "finished": true}}));

    wait_for(&mut notifications, |n| matches!(n, Notification::Turn(_))).await;

    let status = engine.status().await?;
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.last_error, None);

    Ok(())
}

#[tokio::test]
async fn test_response_audio_is_recorded_per_round() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = EngineConfig {
        recordings_dir: Some(temp_dir.path().to_path_buf()),
        ..Default::default()
    };

    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, config).await?;

    let pcm: Vec<u8> = [1i16, -1, 2, -2]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();

    server.push_event(json!({"event": "ResponseAudioStarted", "payload": {"session_id": "s1"}}));
    server.push(Inbound::Binary(pcm.clone()));
    server.push(Inbound::Binary(pcm));
    server.push_event(json!({"event": "ResponseAudioEnded", "payload": {"session_id": "s1"}}));

    wait_for(&mut notifications, |n| matches!(n, Notification::ResponseAudioEnded)).await;

    let path = temp_dir.path().join("s1-response-000.wav");
    assert!(path.exists(), "recording should exist at {:?}", path);

    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, 16000);
    assert_eq!(reader.len(), 8);

    assert_eq!(engine.status().await?.frames_received, 2);

    Ok(())
}

#[tokio::test]
async fn test_restart_clears_previous_transcript() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, mut notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    server.push_event(json!({"event": "AudioTranscript", "payload": {"session_id": "s1", "text": "hello", "finished": true}}));
    wait_for(&mut notifications, |n| matches!(n, Notification::Turn(_))).await;

    engine.stop().await?;
    server.push_event(session_stopped("s1"));
    wait_for_state(&mut notifications, SessionState::Idle).await;
    assert_eq!(engine.transcript().await?.len(), 1);

    engine.start().await?;
    assert!(engine.transcript().await?.is_empty());
    assert_eq!(server.connects(), 2);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_open_session() -> Result<()> {
    let server = FakeServer::new();
    let mic = FakeMicrophone::default();
    let (engine, _notifications) = connect(&server, &mic, EngineConfig::default()).await?;

    engine.shutdown().await?;

    assert!(!mic.is_capturing());
    assert_eq!(server.closes(), 1);
    assert!(matches!(engine.status().await, Err(EngineError::EngineClosed)));

    Ok(())
}
