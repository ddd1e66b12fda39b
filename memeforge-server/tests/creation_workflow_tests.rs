//! Creation pipeline tests, driven through the HTTP API and directly

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;
use memeforge_common::events::MemeEvent;
use memeforge_server::build_router;
use memeforge_server::models::{CreationStatus, CreationStep, MemeCreation, MemeKind};
use memeforge_server::ServerSettings;

use helpers::{
    harness, harness_with, is_terminal, wait_for, FailingImages, FakeGifs, FakeImages, FakeText,
    GatedImages,
};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_creation_runs_to_completion() {
    let images = Arc::new(FakeImages::default());
    let h = harness_with(
        images.clone(),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await;
    let mut rx = h.state.event_bus.subscribe();
    let app = build_router(h.state.clone());

    let response = app
        .oneshot(post_json(
            "/api/creations",
            json!({"concept": "  a cat who discovered taxes ", "style": "pixel art"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["step"], "queued");
    let creation_id: Uuid = body["creation_id"].as_str().unwrap().parse().unwrap();

    // collect events up to the terminal one
    let mut events = Vec::new();
    loop {
        let event = wait_for(&mut rx, |e| e.creation_id() == Some(creation_id)).await;
        let done = is_terminal(&event);
        events.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(events[0], MemeEvent::CreationStarted { .. }));
    let steps: Vec<CreationStep> = events
        .iter()
        .filter_map(|e| match e {
            MemeEvent::CreationProgress { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            CreationStep::Background,
            CreationStep::Character,
            CreationStep::Composition,
            CreationStep::Caption,
            CreationStep::Finalizing,
        ]
    );

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            MemeEvent::CreationProgress { progress_percent, .. } => Some(*progress_percent),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));

    let artifacts = events
        .iter()
        .filter(|e| matches!(e, MemeEvent::ArtifactReady { .. }))
        .count();
    assert_eq!(artifacts, 3);

    let meme_id = match events.last().unwrap() {
        MemeEvent::CreationCompleted {
            meme_id,
            top_text,
            bottom_text,
            ..
        } => {
            assert_eq!(top_text, "WHEN THE BUILD");
            assert_eq!(bottom_text, "PASSES FIRST TRY");
            *meme_id
        }
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(images.calls.load(Ordering::SeqCst), 2);

    let creation = memeforge_server::db::creations::load_creation(&h.state.db, creation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creation.status, CreationStatus::Completed);
    assert_eq!(creation.step, CreationStep::Done);
    assert_eq!(creation.progress_percent, 100.0);
    assert_eq!(creation.concept, "a cat who discovered taxes");
    assert_eq!(creation.style.as_deref(), Some("pixel art"));
    assert_eq!(creation.meme_id, Some(meme_id));
    assert!(creation.completed_at.is_some());

    for path in [
        &creation.background_path,
        &creation.character_path,
        &creation.composite_path,
        &creation.final_path,
    ] {
        let path = path.as_deref().unwrap();
        assert!(!path.starts_with('/'), "stored paths are relative: {}", path);
        assert!(h.state.files.resolve(path).unwrap().exists());
    }

    let meme = memeforge_server::db::memes::load_meme(&h.state.db, meme_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meme.kind, MemeKind::Generated);
    assert_eq!(meme.creation_id, Some(creation_id));
    assert_eq!((meme.width, meme.height), (128, 128));

    // token released once the task ends
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.state.cancellation_tokens.read().await.is_empty());

    let app = build_router(h.state.clone());
    let view = body_json(
        app.oneshot(get(&format!("/api/creations/{}", creation_id)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(view["status"], "completed");
    assert_eq!(view["caption"]["top_text"], "WHEN THE BUILD");
    assert!(view["image_url"].as_str().unwrap().starts_with("/files/memes/"));
    assert!(view["composite_url"]
        .as_str()
        .unwrap()
        .ends_with(&format!("{}/composite.png", creation_id)));
}

#[tokio::test]
async fn test_start_creation_validation() {
    let h = harness().await;

    let long = "x".repeat(501);
    for payload in [json!({"concept": "   "}), json!({"concept": long})] {
        let app = build_router(h.state.clone());
        let response = app.oneshot(post_json("/api/creations", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let list = memeforge_server::db::creations::list_creations(&h.state.db, 10)
        .await
        .unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_concurrency_limit() {
    let gated = Arc::new(GatedImages::default());
    let settings = ServerSettings {
        max_concurrent_creations: 1,
        ..ServerSettings::default()
    };
    let h = harness_with(
        gated.clone(),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        settings,
    )
    .await;

    let app = build_router(h.state.clone());
    let first = app
        .oneshot(post_json("/api/creations", json!({"concept": "first"})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_id = body_json(first).await["creation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let app = build_router(h.state.clone());
    let second = app
        .oneshot(post_json("/api/creations", json!({"concept": "second"})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let app = build_router(h.state.clone());
    let health = body_json(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["active_creations"], 1);

    // free the slot
    let mut rx = h.state.event_bus.subscribe();
    let app = build_router(h.state.clone());
    app.oneshot(post_json(&format!("/api/creations/{}/cancel", first_id), json!({})))
        .await
        .unwrap();
    wait_for(&mut rx, |e| matches!(e, MemeEvent::CreationCancelled { .. })).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let app = build_router(h.state.clone());
    let third = app
        .oneshot(post_json("/api/creations", json!({"concept": "third"})))
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_cancel_running_creation() {
    let gated = Arc::new(GatedImages::default());
    let h = harness_with(
        gated.clone(),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await;
    let mut rx = h.state.event_bus.subscribe();

    let app = build_router(h.state.clone());
    let body = body_json(
        app.oneshot(post_json("/api/creations", json!({"concept": "never finishes"})))
            .await
            .unwrap(),
    )
    .await;
    let creation_id: Uuid = body["creation_id"].as_str().unwrap().parse().unwrap();

    // generator is now blocked inside the background step
    wait_for(&mut rx, |e| {
        matches!(e, MemeEvent::CreationProgress { step: CreationStep::Background, .. })
    })
    .await;

    let app = build_router(h.state.clone());
    let response = app
        .oneshot(post_json(&format!("/api/creations/{}/cancel", creation_id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["cancel_requested"], true);

    let event = wait_for(&mut rx, is_terminal).await;
    assert!(matches!(event, MemeEvent::CreationCancelled { .. }));

    let creation = memeforge_server::db::creations::load_creation(&h.state.db, creation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creation.status, CreationStatus::Cancelled);
    assert_eq!(creation.step, CreationStep::Background);
    assert!(creation.background_path.is_none());

    // cancelling again is a conflict
    let app = build_router(h.state.clone());
    let response = app
        .oneshot(post_json(&format!("/api/creations/{}/cancel", creation_id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_orphaned_creation() {
    let h = harness().await;
    let mut rx = h.state.event_bus.subscribe();

    // row with no running pipeline behind it
    let creation = MemeCreation::new("orphan".to_string(), None);
    memeforge_server::db::creations::save_creation(&h.state.db, &creation)
        .await
        .unwrap();

    let app = build_router(h.state.clone());
    let response = app
        .oneshot(post_json(
            &format!("/api/creations/{}/cancel", creation.creation_id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancel_requested"], false);

    let event = wait_for(&mut rx, |e| matches!(e, MemeEvent::CreationCancelled { .. })).await;
    assert_eq!(event.creation_id(), Some(creation.creation_id));
}

#[tokio::test]
async fn test_cancel_unknown_creation() {
    let h = harness().await;
    let app = build_router(h.state.clone());

    let response = app
        .oneshot(post_json(
            &format!("/api/creations/{}/cancel", Uuid::new_v4()),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_step_is_recorded() {
    let h = harness_with(
        Arc::new(FailingImages),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await;
    let mut rx = h.state.event_bus.subscribe();

    let app = build_router(h.state.clone());
    let body = body_json(
        app.oneshot(post_json("/api/creations", json!({"concept": "forbidden"})))
            .await
            .unwrap(),
    )
    .await;
    let creation_id: Uuid = body["creation_id"].as_str().unwrap().parse().unwrap();

    let event = wait_for(&mut rx, is_terminal).await;
    match event {
        MemeEvent::CreationFailed { step, error, .. } => {
            assert_eq!(step, CreationStep::Background);
            assert!(error.contains("content policy violation"), "{}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let creation = memeforge_server::db::creations::load_creation(&h.state.db, creation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creation.status, CreationStatus::Failed);
    assert_eq!(creation.step, CreationStep::Background);
    assert!(creation.error.unwrap().contains("content policy violation"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let last_error = h.state.last_error.read().await.clone().unwrap();
    assert!(last_error.contains(&creation_id.to_string()));
}

#[tokio::test]
async fn test_unparseable_caption_fails_at_caption_step() {
    let h = harness_with(
        Arc::new(FakeImages::default()),
        Arc::new(FakeText {
            reply: "   \n  ".to_string(),
        }),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await;

    let creation = MemeCreation::new("silent".to_string(), None);
    memeforge_server::db::creations::save_creation(&h.state.db, &creation)
        .await
        .unwrap();
    let creation_id = creation.creation_id;

    let result = h
        .state
        .orchestrator
        .run(creation, CancellationToken::new())
        .await;
    assert!(result.is_err());

    let stored = memeforge_server::db::creations::load_creation(&h.state.db, creation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CreationStatus::Failed);
    assert_eq!(stored.step, CreationStep::Caption);
    // artifacts from the earlier steps are kept
    assert!(stored.composite_path.is_some());
    assert!(stored.final_path.is_none());
}

#[tokio::test]
async fn test_pre_cancelled_token_stops_before_any_call() {
    let images = Arc::new(FakeImages::default());
    let h = harness_with(
        images.clone(),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await;

    let creation = MemeCreation::new("too late".to_string(), None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h.state.orchestrator.run(creation, cancel).await.unwrap();
    assert_eq!(result.status, CreationStatus::Cancelled);
    assert_eq!(images.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_list_creations() {
    let h = harness().await;
    for concept in ["one", "two", "three"] {
        let creation = MemeCreation::new(concept.to_string(), None);
        memeforge_server::db::creations::save_creation(&h.state.db, &creation)
            .await
            .unwrap();
    }

    let app = build_router(h.state.clone());
    let body = body_json(app.oneshot(get("/api/creations?limit=2")).await.unwrap()).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let app = build_router(h.state.clone());
    let response = app
        .oneshot(get(&format!("/api/creations/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shutdown_cancels_and_drains_running_creations() {
    let gated = Arc::new(GatedImages::default());
    let h = harness_with(
        gated.clone(),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await;
    let mut rx = h.state.event_bus.subscribe();

    let app = build_router(h.state.clone());
    let body = body_json(
        app.oneshot(post_json("/api/creations", json!({"concept": "server going down"})))
            .await
            .unwrap(),
    )
    .await;
    let creation_id: Uuid = body["creation_id"].as_str().unwrap().parse().unwrap();

    wait_for(&mut rx, |e| {
        matches!(e, MemeEvent::CreationProgress { step: CreationStep::Background, .. })
    })
    .await;

    assert!(h.state.shutdown(Duration::from_secs(5)).await);

    // the task has finished, so its events and row are already written
    let event = wait_for(&mut rx, is_terminal).await;
    assert!(matches!(event, MemeEvent::CreationCancelled { .. }));
    assert!(h.state.cancellation_tokens.read().await.is_empty());

    let creation = memeforge_server::db::creations::load_creation(&h.state.db, creation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creation.status, CreationStatus::Cancelled);
}

#[tokio::test]
async fn test_failed_completion_discards_meme() {
    let h = harness().await;
    let mut rx = h.state.event_bus.subscribe();

    // reject only the final status write
    sqlx::query(
        r#"
        CREATE TRIGGER reject_completion BEFORE UPDATE ON meme_creations
        WHEN NEW.status = 'completed'
        BEGIN
            SELECT RAISE(ABORT, 'disk full');
        END
        "#,
    )
    .execute(&h.state.db)
    .await
    .unwrap();

    let creation = MemeCreation::new("almost there".to_string(), None);
    memeforge_server::db::creations::save_creation(&h.state.db, &creation)
        .await
        .unwrap();
    let creation_id = creation.creation_id;

    let result = h
        .state
        .orchestrator
        .run(creation, CancellationToken::new())
        .await;
    assert!(result.is_err());

    let stored = memeforge_server::db::creations::load_creation(&h.state.db, creation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CreationStatus::Failed);
    assert_eq!(stored.step, CreationStep::Finalizing);
    assert!(stored.meme_id.is_none());

    let memes = memeforge_server::db::memes::list_memes(&h.state.db, None, 50, 0)
        .await
        .unwrap();
    assert!(memes.is_empty());

    let memes_dir = h.state.files.root().join("memes");
    let leftover = std::fs::read_dir(&memes_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);

    let event = wait_for(&mut rx, is_terminal).await;
    assert!(matches!(event, MemeEvent::CreationFailed { step: CreationStep::Finalizing, .. }));
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, MemeEvent::MemeCreated { .. }));
    }
}
