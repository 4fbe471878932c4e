use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use alcoguard_agent::{
    AgentStats, AnalysisError, BartenderAgent, Broker, HandlerError, SessionAnalyzer, TurnDirective,
    TurnRequest,
};
use alcoguard_core::audit::HistoryFilter;
use alcoguard_core::clock::Clock;
use alcoguard_core::domain::message::{AgentId, EventType, MessageRecord, NewMessage};
use alcoguard_core::domain::payload::{DrinkAddedPayload, SessionStartedPayload, WirePayload};
use alcoguard_core::domain::session::{Drink, DrinkInput, Session, SessionId, UserId};
use alcoguard_core::domain::warning::InterventionLevel;
use alcoguard_core::errors::{ApplicationError, DomainError, InterfaceError};
use alcoguard_core::risk::SessionAnalysis;
use alcoguard_db::{RepositoryError, SessionRepository};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const SYSTEM_AGENT: &str = "system";

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub sessions: Arc<dyn SessionRepository>,
    pub analyzer: Arc<SessionAnalyzer>,
    pub bartender: Arc<BartenderAgent>,
    pub clock: Arc<dyn Clock>,
    pub guardian_id: AgentId,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(start_session))
        .route("/v1/sessions/{user_id}/{session_id}/analysis", get(session_analysis))
        .route("/v1/sessions/{user_id}/{session_id}/end", post(end_session))
        .route("/v1/drinks", post(record_drink))
        .route("/v1/chat", post(chat_turn))
        .route("/v1/messages", get(message_history))
        .route("/v1/agents", get(agent_stats))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self.0 {
            InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, Some(message.clone())),
            InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, Some(message.clone())),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            reason,
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

fn correlation_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn fail(error: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = error.into_interface(correlation_id);
    warn!(
        event_name = "http.request_failed",
        correlation_id = %correlation_id,
        error = %interface,
        "request failed"
    );
    ApiError(interface)
}

fn repository_failure(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::SessionNotFound(session_id) => {
            ApplicationError::NotFound(format!("session `{session_id}`"))
        }
        RepositoryError::SessionEnded(session_id) => ApplicationError::Domain(
            DomainError::InvariantViolation(format!("session `{session_id}` has already ended")),
        ),
        other => ApplicationError::Persistence(other.to_string()),
    }
}

fn bad_json(rejection: JsonRejection) -> ApplicationError {
    ApplicationError::Domain(DomainError::InvariantViolation(rejection.body_text()))
}

fn require_user(user_id: &str) -> Result<UserId, ApplicationError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ApplicationError::Domain(DomainError::InvariantViolation(
            "user_id is required".to_owned(),
        )));
    }
    Ok(UserId(user_id.to_owned()))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session: Session,
    pub created: bool,
}

async fn open_session(
    state: &AppState,
    user_id: &UserId,
    correlation_id: &str,
) -> Result<(Session, bool), ApplicationError> {
    let (session, created) = state
        .sessions
        .active_or_start(user_id, state.clock.now())
        .await
        .map_err(repository_failure)?;

    if created {
        let payload = SessionStartedPayload {
            user_id: user_id.0.clone(),
            session_id: session.id.0.clone(),
            timestamp: session.start_time,
        };
        let message = NewMessage::new(EventType::SessionStarted, SYSTEM_AGENT)
            .to(state.guardian_id.clone())
            .with_payload(payload.into_payload().map_err(DomainError::from)?);
        publish_best_effort(state, message, correlation_id).await;

        info!(
            event_name = "session.started",
            correlation_id = %correlation_id,
            user_id = %user_id,
            session_id = %session.id,
            "drinking session started"
        );
    }
    Ok((session, created))
}

/// The drink or session is already stored; a messaging failure must not undo that.
async fn publish_best_effort(state: &AppState, message: NewMessage, correlation_id: &str) {
    let event_type = message.event_type.clone();
    if let Err(error) = state.broker.publish(message).await {
        warn!(
            event_name = "http.publish_failed",
            correlation_id = %correlation_id,
            message_type = %event_type,
            error = %error,
            "could not publish event; continuing"
        );
    }
}

pub async fn start_session(
    State(state): State<AppState>,
    body: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|rejection| fail(bad_json(rejection), &correlation_id))?;
    let user_id = require_user(&body.user_id).map_err(|error| fail(error, &correlation_id))?;

    let (session, created) = open_session(&state, &user_id, &correlation_id)
        .await
        .map_err(|error| fail(error, &correlation_id))?;
    Ok(Json(StartSessionResponse { session, created }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<Session>, ApiError> {
    let correlation_id = correlation_id();
    let user_id = UserId(user_id);
    let session_id = SessionId(session_id);

    let owned = state
        .sessions
        .find_session(&user_id, &session_id)
        .await
        .map_err(|error| fail(repository_failure(error), &correlation_id))?;
    if owned.is_none() {
        return Err(fail(
            ApplicationError::NotFound(format!("session `{session_id}`")),
            &correlation_id,
        ));
    }

    let ended = state
        .sessions
        .end_session(&session_id, state.clock.now())
        .await
        .map_err(|error| fail(repository_failure(error), &correlation_id))?
        .ok_or_else(|| {
            fail(ApplicationError::NotFound(format!("session `{session_id}`")), &correlation_id)
        })?;

    info!(
        event_name = "session.ended",
        correlation_id = %correlation_id,
        session_id = %session_id,
        total_alcohol_g = ended.total_alcohol_g,
        "drinking session ended"
    );
    Ok(Json(ended))
}

pub async fn session_analysis(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<SessionAnalysis>, ApiError> {
    let correlation_id = correlation_id();
    let user_id = UserId(user_id);
    let session_id = SessionId(session_id);

    match state.analyzer.try_analyze_session(&user_id, &session_id).await {
        Ok(snapshot) => Ok(Json(snapshot.analysis)),
        Err(AnalysisError::SessionNotFound { session_id, .. }) => Err(fail(
            ApplicationError::NotFound(format!("session `{session_id}`")),
            &correlation_id,
        )),
        Err(AnalysisError::Unavailable(error)) => {
            warn!(
                event_name = "risk.analysis_unavailable",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %error,
                "analysis unavailable; returning safe default"
            );
            Ok(Json(SessionAnalysis::unavailable(state.clock.now())))
        }
    }
}

// ---------------------------------------------------------------------------
// Drinks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RecordDrinkRequest {
    pub user_id: String,
    pub drink_type: String,
    pub alcohol_percentage: f64,
    pub volume_ml: f64,
}

#[derive(Debug, Serialize)]
pub struct SessionStatsView {
    pub session_id: String,
    pub total_alcohol_g: f64,
    pub drinks_count: usize,
    pub duration_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct GuardianView {
    /// `ok|caution|warning|stop`, or `unknown` when the analysis could not run.
    pub status: String,
    pub color: String,
    pub message: String,
    pub intervention_level: InterventionLevel,
    pub recommendations: Vec<String>,
}

impl GuardianView {
    fn from_analysis(analysis: &SessionAnalysis) -> Self {
        if !analysis.data_available {
            return Self {
                status: "unknown".to_owned(),
                color: "gray".to_owned(),
                message: "Session status unknown; assuming safe.".to_owned(),
                intervention_level: InterventionLevel::None,
                recommendations: Vec::new(),
            };
        }
        let level = analysis.warning_level;
        Self {
            status: level.as_str().to_owned(),
            color: level.color().to_owned(),
            message: level.message().to_owned(),
            intervention_level: analysis.intervention_level,
            recommendations: analysis.recommendation_messages(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordDrinkResponse {
    pub drink: Drink,
    pub session: SessionStatsView,
    pub guardian: GuardianView,
}

pub async fn record_drink(
    State(state): State<AppState>,
    body: Result<Json<RecordDrinkRequest>, JsonRejection>,
) -> Result<Json<RecordDrinkResponse>, ApiError> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|rejection| fail(bad_json(rejection), &correlation_id))?;
    let user_id = require_user(&body.user_id).map_err(|error| fail(error, &correlation_id))?;
    let input = DrinkInput {
        drink_type: body.drink_type,
        volume_ml: body.volume_ml,
        alcohol_percentage: body.alcohol_percentage,
    };
    input
        .validate()
        .map_err(|error| fail(ApplicationError::from(DomainError::from(error)), &correlation_id))?;

    let (session, _) = open_session(&state, &user_id, &correlation_id)
        .await
        .map_err(|error| fail(error, &correlation_id))?;
    let drink = Drink::record(session.id.clone(), input, state.clock.now())
        .map_err(|error| fail(ApplicationError::from(DomainError::from(error)), &correlation_id))?;
    state
        .sessions
        .append_drink(drink.clone())
        .await
        .map_err(|error| fail(repository_failure(error), &correlation_id))?;

    info!(
        event_name = "drink.recorded",
        correlation_id = %correlation_id,
        user_id = %user_id,
        session_id = %session.id,
        drink_type = %drink.drink_type,
        alcohol_g = drink.alcohol_g,
        "drink recorded"
    );

    let payload = DrinkAddedPayload {
        user_id: user_id.0.clone(),
        session_id: session.id.0.clone(),
        drink_id: Some(drink.id.0.clone()),
        drink_type: drink.drink_type.clone(),
        alcohol_g: drink.alcohol_g,
    };
    match payload.into_payload() {
        Ok(payload) => {
            let message = NewMessage::new(EventType::DrinkAdded, SYSTEM_AGENT)
                .to(state.guardian_id.clone())
                .with_payload(payload);
            publish_best_effort(&state, message, &correlation_id).await;
        }
        Err(error) => warn!(
            event_name = "http.publish_failed",
            correlation_id = %correlation_id,
            error = %error,
            "could not encode drink.added payload"
        ),
    }

    let snapshot = state.analyzer.snapshot(&user_id, &session.id).await;
    let response = RecordDrinkResponse {
        session: SessionStatsView {
            session_id: session.id.0.clone(),
            total_alcohol_g: snapshot
                .session
                .as_ref()
                .map_or(session.total_alcohol_g + drink.alcohol_g, |current| current.total_alcohol_g),
            drinks_count: snapshot.analysis.drinks_count,
            duration_minutes: snapshot.duration_minutes(),
        },
        guardian: GuardianView::from_analysis(&snapshot.analysis),
        drink,
    };
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

pub async fn chat_turn(
    State(state): State<AppState>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnDirective>, ApiError> {
    let correlation_id = correlation_id();
    let Json(request) = body.map_err(|rejection| fail(bad_json(rejection), &correlation_id))?;
    require_user(&request.user_id).map_err(|error| fail(error, &correlation_id))?;

    let directive = state
        .bartender
        .compose_turn(state.broker.as_ref(), request)
        .await
        .map_err(|error| fail(turn_failure(error), &correlation_id))?;
    Ok(Json(directive))
}

fn turn_failure(error: HandlerError) -> ApplicationError {
    match error {
        HandlerError::MalformedPayload(error) => ApplicationError::Domain(DomainError::from(error)),
        other => ApplicationError::Messaging(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Broker introspection
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn filter(&self) -> HistoryFilter {
        HistoryFilter {
            from: self.from.as_deref().filter(|value| !value.trim().is_empty()).map(AgentId::from),
            event_type: self
                .event_type
                .as_deref()
                .filter(|value| !value.trim().is_empty())
                .map(EventType::parse),
        }
    }
}

pub async fn message_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let correlation_id = correlation_id();
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state
        .broker
        .message_history(&query.filter(), limit)
        .await
        .map_err(|error| fail(ApplicationError::Messaging(error.to_string()), &correlation_id))?;
    Ok(Json(records))
}

pub async fn agent_stats(State(state): State<AppState>) -> Json<AgentStats> {
    Json(state.broker.agent_stats())
}
