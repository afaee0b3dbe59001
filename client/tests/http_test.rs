//! End-to-end: the scheduler over HTTP against the reference server.

mod support;

use std::sync::Arc;
use std::time::Duration;

use sitesync_client::{
    Draft, EngineConfig, HttpTransport, Notice, Target, Transport, TransportError,
};
use sitesync_engine::{
    attendance_entity_id, Attendance, ChatMessage, Connectivity, DailyProgressReport,
    MutationPayload, MutationStatus, SyncRequest,
};
use sitesync_server::{app, AppState, Config};
use support::TestDb;

const DAY: &str = "2026-03-02";

async fn start_server(auth_secret: Option<&str>) -> String {
    let state = AppState::in_memory(Config {
        auth_secret: auth_secret.map(str::to_string),
        ..Default::default()
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(db: &TestDb, server_url: &str, token: Option<&str>) -> EngineConfig {
    EngineConfig {
        server_url: server_url.to_string(),
        database: db.url.clone(),
        session_token: token.map(str::to_string),
        batch_timeout: Duration::from_secs(5),
        ..support::test_config()
    }
}

async fn open(config: EngineConfig) -> sitesync_client::SyncScheduler {
    let transport = Arc::new(HttpTransport::new(&config.server_url, config.batch_timeout).unwrap());
    let pool = sitesync_client::db::create_pool(&config.database).await.unwrap();
    sitesync_client::SyncScheduler::open(config, transport, pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn probe_and_empty_batch() {
    let url = start_server(None).await;
    let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();

    transport.probe().await.unwrap();
    let response = transport
        .submit(SyncRequest::new("field-client-1", &[]))
        .await
        .unwrap();
    assert!(response.results.is_empty());

    let offline = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    assert!(matches!(
        offline.probe().await,
        Err(TransportError::Network(_)) | Err(TransportError::Timeout)
    ));
}

#[tokio::test]
async fn field_day_syncs_end_to_end() {
    let url = start_server(None).await;
    let db = TestDb::new();
    let mut engine = open(config(&db, &url, None)).await;

    let attendance = engine
        .submit(Draft {
            target: Target::Entity(attendance_entity_id(DAY)),
            payload: MutationPayload::Attendance(Attendance {
                date: DAY.into(),
                present: true,
                workers: 22,
                absent: 1,
            }),
        })
        .await
        .unwrap();
    let report = engine
        .submit(Draft {
            target: Target::New,
            payload: MutationPayload::Dpr(DailyProgressReport {
                date: DAY.into(),
                attendance_ref: attendance_entity_id(DAY),
                summary: "Brickwork level 1, east wing".into(),
                labor_count: 22,
                weather: None,
                delay: Some("Late cement delivery".into()),
            }),
        })
        .await
        .unwrap();
    let chat = engine
        .submit(Draft {
            target: Target::New,
            payload: MutationPayload::ChatMessage(ChatMessage {
                channel: "site-b".into(),
                body: "Scaffold check done".into(),
            }),
        })
        .await
        .unwrap();

    engine.set_connectivity(Connectivity::Online).await.unwrap();
    let outcome = engine.sync_once().await.unwrap();
    assert_eq!(
        outcome.acked,
        vec![attendance.id.clone(), report.id.clone(), chat.id.clone()]
    );

    for m in [&attendance, &report, &chat] {
        assert_eq!(engine.queue().get(&m.id).unwrap().status, MutationStatus::Acked);
        let entity = engine.store().read(&m.entity_id).unwrap();
        assert!(entity.server_id().is_some());
        assert_eq!(entity.version(), 1);
    }
    assert_eq!(engine.session().queue_depth, 0);
}

#[tokio::test]
async fn rejected_token_pauses_until_renewed() {
    let url = start_server(Some("site-token")).await;
    let db = TestDb::new();
    let mut engine = open(config(&db, &url, Some("yesterdays-token"))).await;
    let mut notices = engine.publisher().notices();

    let m = engine
        .submit(Draft {
            target: Target::Entity("t1".into()),
            payload: MutationPayload::TaskUpdate(sitesync_engine::TaskUpdate {
                status: sitesync_engine::TaskStatus::Completed,
                note: Some("Handed over".into()),
            }),
        })
        .await
        .unwrap();

    engine.set_connectivity(Connectivity::Online).await.unwrap();
    let first = engine.sync_once().await.unwrap();
    assert_eq!(first.error, Some(TransportError::Unauthorized));
    assert_eq!(notices.recv().await.unwrap(), Notice::SessionExpired);
    assert_eq!(engine.queue().get(&m.id).unwrap().attempts, 0);

    assert!(engine.resume_session("site-token".to_string()).await.unwrap());
    let second = engine.sync_once().await.unwrap();
    assert_eq!(second.acked, vec![m.id.clone()]);
}

#[tokio::test]
async fn repeated_offline_edits_keep_the_last_value() {
    let url = start_server(None).await;
    let db = TestDb::new();
    let mut engine = open(config(&db, &url, None)).await;

    let mark = |workers: u32| Draft {
        target: Target::Entity(attendance_entity_id(DAY)),
        payload: MutationPayload::Attendance(Attendance {
            date: DAY.into(),
            present: true,
            workers,
            absent: 0,
        }),
    };

    engine.submit(mark(18)).await.unwrap();
    engine.set_connectivity(Connectivity::Online).await.unwrap();
    engine.sync_once().await.unwrap();
    engine.set_connectivity(Connectivity::Offline).await.unwrap();

    let first = engine.submit(mark(20)).await.unwrap();
    let second = engine.submit(mark(25)).await.unwrap();
    assert_eq!(first.base_version, Some(1));
    assert_eq!(second.base_version, Some(1));

    engine.set_connectivity(Connectivity::Online).await.unwrap();
    let outcome = engine.sync_once().await.unwrap();
    assert_eq!(outcome.acked, vec![first.id.clone(), second.id.clone()]);
    assert!(outcome.conflicts.is_empty());

    let entity = engine.store().read(&attendance_entity_id(DAY)).unwrap();
    assert_eq!(entity.version(), 3);
    assert_eq!(entity.fields()["workers"], 25);
    assert!(entity.superseded.is_none());
}
