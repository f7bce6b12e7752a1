use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError, state_machine::InvalidTransition},
};

/// How a caller should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected by the rules; retrying the same request fails again.
    Rejected,
    /// Transient; the same request may succeed later.
    Retryable,
    /// Server-side defect.
    Fatal,
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No room with the given id or code.
    #[error("room not found")]
    RoomNotFound,
    /// No deck with the given id.
    #[error("deck not found")]
    DeckNotFound,
    /// Caller is not a participant of the room.
    #[error("participant is not in this room")]
    NotInRoom,
    /// Caller may not perform the operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    /// Request carries no identity.
    #[error("missing caller identity")]
    Unauthenticated,
    /// Operation is not allowed in the current phase.
    #[error("phase violation: {0}")]
    PhaseViolation(String),
    /// New participants can only join the lobby.
    #[error("room already started")]
    RoomAlreadyStarted,
    /// Somebody in the lobby is not ready.
    #[error("not all participants are ready")]
    NotAllReady,
    /// Answers are not accepted right now.
    #[error("round is not accepting answers")]
    RoundNotActive,
    /// Pending action state does not allow the operation.
    #[error("pending action conflict: {0}")]
    PendingActionConflict(String),
    /// Participant cap reached.
    #[error("room is full")]
    RoomFull,
    /// The deck has no playable question.
    #[error("no questions available")]
    NoQuestionsAvailable,
    /// Round or its question is missing from storage.
    #[error("round not found")]
    RoundNotFound,
    /// Unknown action name.
    #[error("invalid action: {0}")]
    InvalidAction(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Another writer changed the room concurrently.
    #[error("room was modified concurrently")]
    Conflict,
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Stored data is inconsistent.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::RoomNotFound => "ROOM_NOT_FOUND",
            ServiceError::DeckNotFound => "DECK_NOT_FOUND",
            ServiceError::NotInRoom => "NOT_IN_ROOM",
            ServiceError::NotAuthorized(_) => "NOT_AUTHORIZED",
            ServiceError::Unauthenticated => "UNAUTHENTICATED",
            ServiceError::PhaseViolation(_) => "PHASE_VIOLATION",
            ServiceError::RoomAlreadyStarted => "ROOM_ALREADY_STARTED",
            ServiceError::NotAllReady => "NOT_ALL_READY",
            ServiceError::RoundNotActive => "ROUND_NOT_ACTIVE",
            ServiceError::PendingActionConflict(_) => "PENDING_ACTION_CONFLICT",
            ServiceError::RoomFull => "ROOM_FULL",
            ServiceError::NoQuestionsAvailable => "NO_QUESTIONS_AVAILABLE",
            ServiceError::RoundNotFound => "ROUND_NOT_FOUND",
            ServiceError::InvalidAction(_) => "INVALID_ACTION",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::Conflict => "CONFLICT",
            ServiceError::Timeout => "TIMEOUT",
            ServiceError::Unavailable(_) => "STORAGE_UNAVAILABLE",
            ServiceError::Degraded => "DEGRADED",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }

    /// Error class used for the `retryable` flag.
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Conflict
            | ServiceError::Timeout
            | ServiceError::Unavailable(_)
            | ServiceError::Degraded => ErrorClass::Retryable,
            ServiceError::Internal(_) => ErrorClass::Fatal,
            _ => ErrorClass::Rejected,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::RoomNotFound | ServiceError::DeckNotFound | ServiceError::RoundNotFound => {
                StatusCode::NOT_FOUND
            }
            ServiceError::NotInRoom | ServiceError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServiceError::PhaseViolation(_)
            | ServiceError::RoomAlreadyStarted
            | ServiceError::NotAllReady
            | ServiceError::RoundNotActive
            | ServiceError::PendingActionConflict(_)
            | ServiceError::RoomFull
            | ServiceError::NoQuestionsAvailable
            | ServiceError::Conflict => StatusCode::CONFLICT,
            ServiceError::InvalidAction(_) | ServiceError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Timeout | ServiceError::Unavailable(_) | ServiceError::Degraded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupt { .. } => ServiceError::Internal(err.to_string()),
            StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request rejected by validation or room rules.
    #[error("{message}")]
    Rejected {
        /// HTTP status.
        status: StatusCode,
        /// Stable error code.
        code: &'static str,
        /// Human readable message.
        message: String,
    },
    /// Transient failure; the client may retry.
    #[error("{message}")]
    Retryable {
        /// HTTP status.
        status: StatusCode,
        /// Stable error code.
        code: &'static str,
        /// Human readable message.
        message: String,
    },
    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Stable error code.
        code: &'static str,
        /// Human readable message.
        message: String,
    },
}

impl AppError {
    /// Reject the request with `400 INVALID_INPUT`.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::Rejected {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_INPUT",
            message: message.into(),
        }
    }

    /// Stable error code of the failure.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Rejected { code, .. }
            | AppError::Retryable { code, .. }
            | AppError::Internal { code, .. } => code,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = err.status();
        let code = err.code();
        let message = err.to_string();
        match err.class() {
            ErrorClass::Rejected => AppError::Rejected {
                status,
                code,
                message,
            },
            ErrorClass::Retryable => AppError::Retryable {
                status,
                code,
                message,
            },
            ErrorClass::Fatal => AppError::Internal { code, message },
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::invalid_input(format!("validation failed: {err}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::invalid_input(err.body_text())
    }
}

/// JSON error envelope returned by every failing route.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human readable message.
    pub error: String,
    /// Stable error code.
    pub code: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, retryable) = match &self {
            AppError::Rejected { status, .. } => (*status, false),
            AppError::Retryable { status, .. } => (*status, true),
            AppError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, false),
        };

        let payload = Json(ErrorBody {
            error: self.to_string(),
            code: self.code().to_owned(),
            retryable,
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::PendingActionConflict("another action is already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::PhaseViolation(invalid.to_string())
            }
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::PhaseViolation(err.to_string())
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => {
                ServiceError::PendingActionConflict("no action is pending".into())
            }
            ApplyError::NotDue { execute_at } => ServiceError::PendingActionConflict(format!(
                "pending action is not due before {execute_at}"
            )),
            ApplyError::IdMismatch { .. } => {
                ServiceError::PendingActionConflict("pending action does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => {
                ServiceError::PhaseViolation(format!(
                    "room left {expected} before the pending action executed (now {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => {
                ServiceError::PendingActionConflict("no action is pending".into())
            }
            AbortError::IdMismatch { .. } => {
                ServiceError::PendingActionConflict("pending action does not match".into())
            }
        }
    }
}
