//! Mentor Server
//!
//! Axum server exposing the session orchestrator over HTTP. Each user gets
//! one session state machine; all machines share the database, the request
//! coordinator, and a broadcast channel that feeds the SSE event stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use mentor_core::{
    AgentGateway, AgentId, MentorDb, OrchestratorConfig, OrchestratorError, RequestCoordinator,
    SessionEvent, SessionMachine, SessionStatus, WeeklyProgressRecord,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, Mutex, RwLock},
};

/// Application state
struct AppState {
    /// One state machine per user, created lazily
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionMachine>>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Sender cloned into every machine; a bridge task forwards to broadcast
    session_tx: mpsc::Sender<SessionEvent>,
    db: Arc<MentorDb>,
    coordinator: Arc<RequestCoordinator>,
    config: OrchestratorConfig,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Deserialize, Default)]
struct PayloadRequest {
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ChooseTrackRequest {
    track: String,
}

#[derive(Deserialize)]
struct ConsultRequest {
    agent: String,
    action: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    status: SessionStatus,
}

#[derive(Serialize)]
struct DataResponse {
    success: bool,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct ProgressResponse {
    success: bool,
    record: Option<WeeklyProgressRecord>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(err: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        OrchestratorError::InvalidPhase { .. } => StatusCode::CONFLICT,
        OrchestratorError::Configuration(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Transport { .. } => StatusCode::BAD_GATEWAY,
        OrchestratorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: message,
        }),
    )
}

/// Get or lazily create the state machine for a user
async fn machine_for(state: &SharedState, user_id: &str) -> Arc<Mutex<SessionMachine>> {
    if let Some(machine) = state.sessions.read().await.get(user_id) {
        return Arc::clone(machine);
    }

    let mut sessions = state.sessions.write().await;
    Arc::clone(sessions.entry(user_id.to_string()).or_insert_with(|| {
        tracing::info!(user = user_id, "Creating session machine");
        Arc::new(Mutex::new(
            SessionMachine::new(
                user_id,
                state.config.clone(),
                Arc::clone(&state.coordinator),
                &state.db,
            )
            .with_event_channel(state.session_tx.clone()),
        ))
    }))
}

// === Session Handlers ===

async fn get_status(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine.lock().await.status().await.map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn get_progress(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<ProgressResponse> {
    let machine = machine_for(&state, &user_id).await;
    let record = machine
        .lock()
        .await
        .progress_record()
        .await
        .map_err(api_error)?;
    Ok(Json(ProgressResponse {
        success: true,
        record,
    }))
}

async fn resume_session(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine.lock().await.resume().await.map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn acknowledge_onboarding(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<PayloadRequest>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine
        .lock()
        .await
        .acknowledge_onboarding(req.payload)
        .await
        .map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn approve_plan(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine
        .lock()
        .await
        .approve_plan()
        .await
        .map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn reject_plan(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine
        .lock()
        .await
        .reject_plan()
        .await
        .map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn load_lesson(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<PayloadRequest>,
) -> ApiResult<DataResponse> {
    let machine = machine_for(&state, &user_id).await;
    let data = machine
        .lock()
        .await
        .load_lesson(req.payload)
        .await
        .map_err(api_error)?;
    Ok(Json(DataResponse {
        success: true,
        data,
    }))
}

async fn choose_track(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<ChooseTrackRequest>,
) -> ApiResult<StatusResponse> {
    let track = AgentId::parse(&req.track)
        .ok_or_else(|| bad_request(format!("unknown agent '{}'", req.track)))?;

    let machine = machine_for(&state, &user_id).await;
    let status = machine
        .lock()
        .await
        .choose_track(track)
        .await
        .map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn practice_turn(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<PayloadRequest>,
) -> ApiResult<DataResponse> {
    let machine = machine_for(&state, &user_id).await;
    let data = machine
        .lock()
        .await
        .practice_turn(req.payload)
        .await
        .map_err(api_error)?;
    Ok(Json(DataResponse {
        success: true,
        data,
    }))
}

async fn complete_track(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine
        .lock()
        .await
        .complete_track()
        .await
        .map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

async fn consult_agent(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<ConsultRequest>,
) -> ApiResult<DataResponse> {
    let agent = AgentId::parse(&req.agent)
        .ok_or_else(|| bad_request(format!("unknown agent '{}'", req.agent)))?;

    let machine = machine_for(&state, &user_id).await;
    let data = machine
        .lock()
        .await
        .consult_agent(agent, &req.action, req.payload)
        .await
        .map_err(api_error)?;
    Ok(Json(DataResponse {
        success: true,
        data,
    }))
}

async fn reset_session(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let machine = machine_for(&state, &user_id).await;
    let status = machine
        .lock()
        .await
        .hard_reset()
        .await
        .map_err(api_error)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

/// SSE endpoint for real-time session events with heartbeat
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        let next = tokio::time::timeout(Duration::from_secs(15), rx.recv()).await;
        match next {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Ok(Err(_)) => None, // Channel closed
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// === CLI ===

#[derive(Parser, Clone)]
#[command(author, version, about = "Mentor - Agent Session Orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Mentor server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Print a user's current week and progress from the local database
    Status {
        /// User to look up
        user: String,
    },
}

/// CLI status lookup: reads the database directly, no server required
fn print_status(user: &str, config: &OrchestratorConfig) -> anyhow::Result<()> {
    use mentor_core::clock::week_number;
    use mentor_core::state::ProgressStore;

    let db = MentorDb::open()?;
    let week = week_number(config.epoch, chrono::Utc::now());
    let record = ProgressStore::new(&db).get(user, week)?;

    println!("User:  {}", user);
    println!("Week:  {}", week);
    match record {
        Some(record) => {
            println!("Progress: {}%", record.overall_progress);
            for (agent, progress) in &record.agents {
                let mark = if progress.completed { "✅" } else { "⏳" };
                println!("  {} {}", mark, agent);
            }
        }
        None => println!("Progress: no record for this week"),
    }
    Ok(())
}

/// Build the orchestrator config from environment variables
fn load_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();

    if let Ok(url) = std::env::var("MENTOR_GATEWAY_URL") {
        config.gateway_base_url = url;
    }
    if let Some(ttl) = env_parse::<u64>("MENTOR_CACHE_TTL_SECS") {
        config.cache_ttl_secs = ttl;
    }
    if let Some(timeout) = env_parse::<u64>("MENTOR_REQUEST_TIMEOUT_SECS") {
        config.request_timeout_secs = timeout;
    }
    if let Ok(epoch) = std::env::var("MENTOR_EPOCH") {
        match chrono::DateTime::parse_from_rfc3339(&epoch) {
            Ok(t) => config.epoch = t.with_timezone(&chrono::Utc),
            Err(e) => tracing::warn!("Ignoring invalid MENTOR_EPOCH: {}", e),
        }
    }

    config
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// === Server Entry ===

pub async fn run_server() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config();

    let port = match args.command {
        Some(CliCommand::Serve { port }) => port,
        Some(CliCommand::Status { user }) => {
            return print_status(&user, &config);
        }
        None => 8080,
    };

    let db = Arc::new(MentorDb::open()?);
    let gateway = Arc::new(AgentGateway::new(config.clone())?);
    let coordinator = Arc::new(RequestCoordinator::new(
        gateway,
        Duration::from_secs(config.cache_ttl_secs),
    ));

    let (event_tx, _) = broadcast::channel::<SessionEvent>(100);
    let (session_tx, mut session_rx) = mpsc::channel::<SessionEvent>(100);

    // Bridge machine events to the SSE broadcast
    let broadcast_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = session_rx.recv().await {
            let _ = broadcast_tx.send(event);
        }
    });

    let state: SharedState = Arc::new(AppState {
        sessions: RwLock::new(HashMap::new()),
        event_tx,
        session_tx,
        db,
        coordinator,
        config,
    });

    let session_routes = Router::new()
        .route("/:user_id/status", get(get_status))
        .route("/:user_id/progress", get(get_progress))
        .route("/:user_id/resume", post(resume_session))
        .route("/:user_id/acknowledge", post(acknowledge_onboarding))
        .route("/:user_id/approve", post(approve_plan))
        .route("/:user_id/reject", post(reject_plan))
        .route("/:user_id/lesson", post(load_lesson))
        .route("/:user_id/track", post(choose_track))
        .route("/:user_id/practice", post(practice_turn))
        .route("/:user_id/complete-track", post(complete_track))
        .route("/:user_id/consult", post(consult_agent))
        .route("/:user_id/reset", post(reset_session));

    let app = Router::new()
        .nest("/api/v1/session", session_routes)
        .route("/api/v1/events", get(events))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("🚀 Mentor Server running at http://{}", addr);
    println!("   Session:  /api/v1/session/:user_id/status, /resume, /acknowledge");
    println!("   Plan:     /api/v1/session/:user_id/approve, /reject");
    println!("   Learning: /api/v1/session/:user_id/lesson, /track, /practice");
    println!("   Events:   /api/v1/events (SSE)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("╔═══════════════════════════════════════╗");
    println!("║            MENTOR SERVER              ║");
    println!("╚═══════════════════════════════════════╝");

    run_server().await
}
