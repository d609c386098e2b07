//! Control Plane
//!
//! The request-response surface over the orchestration core plus the
//! server-sent status stream. This is the only outward-facing interface
//! the core hosts; read-side query APIs live elsewhere.

mod stream;
mod types;

pub use stream::{ResetRequired, StatusStream};
pub use types::{
    ControlError, ErrorBody, FrameKind, PauseRequest, StartRequest, StartResponse, StatusFrame,
    SystemStatus, TriggerResponse,
};

use crate::core::context::CoreContext;
use crate::core::events::SystemEvent;
use crate::core::executor::ExecutorPool;
use crate::core::phases::PhasedLoader;
use crate::core::scheduler::Scheduler;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Shared state behind every control route
pub struct ControlPlane {
    pub ctx: CoreContext,
    pub pool: ExecutorPool,
    pub scheduler: Arc<Scheduler>,
    pub loader: Arc<PhasedLoader>,
    pub stream: StatusStream,
}

impl ControlPlane {
    #[must_use]
    pub fn new(
        ctx: CoreContext,
        pool: ExecutorPool,
        scheduler: Arc<Scheduler>,
        loader: Arc<PhasedLoader>,
    ) -> Arc<Self> {
        let stream = StatusStream::new(Duration::from_secs(ctx.config.stream_buffer_seconds));
        let plane = Arc::new(Self {
            ctx,
            pool,
            scheduler,
            loader,
            stream,
        });
        tokio::spawn(Self::event_pump(plane.clone()));
        plane
    }

    /// Bridge system events onto the status stream and keep the >=1s tick
    /// cadence when nothing else happens
    async fn event_pump(plane: Arc<Self>) {
        let mut events = plane.ctx.events.subscribe();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            let kind = match &event {
                                SystemEvent::RunStarted { .. } => FrameKind::RunStarted,
                                SystemEvent::RunFinished { .. } => FrameKind::RunFinished,
                                SystemEvent::PhaseChanged { .. } => FrameKind::PhaseChanged,
                                SystemEvent::Alert { .. } => FrameKind::Alert,
                            };
                            let payload = serde_json::to_value(&event)
                                .unwrap_or_else(|_| serde_json::json!({}));
                            plane.stream.push(kind, payload);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "event pump lagged behind the bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = tick.tick() => {
                    let pool = plane.pool.status();
                    plane.stream.push(
                        FrameKind::Tick,
                        serde_json::json!({
                            "queued": pool.queued,
                            "running": pool.running.len(),
                            "accepting": pool.accepting,
                        }),
                    );
                }
            }
        }
    }

    /// Build the control router
    pub fn router(plane: Arc<Self>) -> Router {
        Router::new()
            .route("/status", get(get_status))
            .route("/phased/start", post(phased_start))
            .route("/phased/pause", post(phased_pause))
            .route("/phased/resume", post(phased_resume))
            .route("/phased/skip", post(phased_skip))
            .route("/phased/cancel", post(phased_cancel))
            .route("/scraper/{id}/trigger", post(trigger_scraper))
            .route("/run/{id}", get(get_run))
            .route("/stream", get(stream_status))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(plane)
    }

    /// Serve the control plane until the process stops
    pub async fn serve(plane: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "control plane listening");
        axum::serve(listener, Self::router(plane)).await?;
        Ok(())
    }
}

async fn get_status(
    State(plane): State<Arc<ControlPlane>>,
) -> Result<Json<SystemStatus>, ControlError> {
    let recent_runs = plane.ctx.store.recent_runs(20).await?;
    Ok(Json(SystemStatus {
        pool: plane.pool.status(),
        session: plane.loader.status().await,
        recent_runs,
        rss_kb: crate::core::executor::memory::current_rss_kb(),
    }))
}

async fn phased_start(
    State(plane): State<Arc<ControlPlane>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ControlError> {
    let strategy = request.strategy.unwrap_or(plane.ctx.config.strategy);
    let session_id = plane.loader.start(strategy, "control-plane").await?;
    Ok(Json(StartResponse { session_id }))
}

async fn phased_pause(
    State(plane): State<Arc<ControlPlane>>,
    request: Option<Json<PauseRequest>>,
) -> Result<Json<serde_json::Value>, ControlError> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "operator request".to_string());
    plane.loader.pause(&reason).await?;
    Ok(Json(serde_json::json!({"paused": true})))
}

async fn phased_resume(
    State(plane): State<Arc<ControlPlane>>,
) -> Result<Json<serde_json::Value>, ControlError> {
    plane.loader.resume().await?;
    Ok(Json(serde_json::json!({"resumed": true})))
}

async fn phased_skip(
    State(plane): State<Arc<ControlPlane>>,
) -> Result<Json<serde_json::Value>, ControlError> {
    plane.loader.skip_phase().await?;
    Ok(Json(serde_json::json!({"skipped": true})))
}

async fn phased_cancel(
    State(plane): State<Arc<ControlPlane>>,
) -> Result<Json<serde_json::Value>, ControlError> {
    plane.loader.cancel().await?;
    Ok(Json(serde_json::json!({"cancelled": true})))
}

async fn trigger_scraper(
    State(plane): State<Arc<ControlPlane>>,
    Path(id): Path<String>,
) -> Result<Json<TriggerResponse>, ControlError> {
    let handle = plane.scheduler.trigger(&id).await?;
    Ok(Json(TriggerResponse {
        run_id: handle.run_id,
    }))
}

async fn get_run(
    State(plane): State<Arc<ControlPlane>>,
    Path(id): Path<String>,
) -> Result<Json<crate::core::model::ScrapingRun>, ControlError> {
    let run = plane
        .ctx
        .store
        .get_run(&id)
        .await?
        .ok_or(ControlError::RunNotFound(id))?;
    Ok(Json(run))
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    last_seq: Option<u64>,
}

async fn stream_status(
    State(plane): State<Arc<ControlPlane>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // subscribe before replaying so nothing falls between the two
    let live = plane.stream.subscribe();
    let replay = match query.last_seq {
        Some(last_seq) => plane.stream.replay_since(last_seq).map_err(|ResetRequired| ()),
        None => Ok(Vec::new()),
    };

    let sse_stream = async_stream::stream! {
        let mut last_delivered = 0u64;

        match replay {
            Err(()) => {
                // consumer fell outside the buffer window
                let event = Event::default()
                    .event("reset_required")
                    .data("{}");
                yield Ok(event);
                return;
            }
            Ok(frames) => {
                for frame in frames {
                    last_delivered = frame.seq;
                    if let Ok(event) = Event::default()
                        .event(frame.kind.as_str())
                        .json_data(&frame)
                    {
                        yield Ok(event);
                    }
                }
            }
        }

        let mut live = live;
        loop {
            match live.recv().await {
                Ok(frame) => {
                    if frame.seq <= last_delivered {
                        continue; // already replayed
                    }
                    last_delivered = frame.seq;
                    if let Ok(event) = Event::default()
                        .event(frame.kind.as_str())
                        .json_data(&frame)
                    {
                        yield Ok(event);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    // this consumer can no longer be gapless
                    let event = Event::default().event("reset_required").data("{}");
                    yield Ok(event);
                    return;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    };

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}
