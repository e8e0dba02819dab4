use thiserror::Error;

/// Failures surfaced to the user while resolving an access code or a scan.
///
/// Every kind is recoverable: the caller shows [`AccessError::user_message`]
/// and lets the user retry in place. None of these are raised as panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("incomplete code: expected {expected} characters, got {got}")]
    IncompleteCode { expected: usize, got: usize },

    #[error("no guest matches code {0}")]
    GuestNotFound(String),

    #[error("no table matches code {0}")]
    TableNotFound(String),

    #[error("{kind} {id} not found")]
    EntityNotFound { kind: &'static str, id: String },

    #[error("malformed QR payload: {0}")]
    MalformedPayload(String),

    #[error("no QR code detected in image")]
    NoCodeDetected,

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
}

impl AccessError {
    pub fn entity(kind: &'static str, id: impl Into<String>) -> Self {
        AccessError::EntityNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Text for the toast/inline message shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            AccessError::IncompleteCode { .. } => "Please enter the complete code",
            AccessError::GuestNotFound(_) => "Invalid guest code",
            AccessError::TableNotFound(_) => "Invalid table code",
            AccessError::EntityNotFound { .. } => "Invitation not found",
            AccessError::MalformedPayload(_) => "This QR code is not a valid invitation",
            AccessError::NoCodeDetected => "No QR code detected, please try again",
            AccessError::CameraUnavailable(_) => "Camera unavailable, please upload an image",
        }
    }

    /// Lookup misses clear the inputs and return focus to the first cell.
    pub fn clears_inputs(&self) -> bool {
        matches!(
            self,
            AccessError::GuestNotFound(_)
                | AccessError::TableNotFound(_)
                | AccessError::EntityNotFound { .. }
        )
    }

    pub fn is_recoverable(&self) -> bool {
        true
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage data could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("write rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum CheckInError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("check-in was not recorded: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(feature = "web")]
mod web_responses {
    use super::{AccessError, CheckInError};
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };

    impl AccessError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                AccessError::IncompleteCode { .. } | AccessError::MalformedPayload(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                AccessError::GuestNotFound(_)
                | AccessError::TableNotFound(_)
                | AccessError::EntityNotFound { .. }
                | AccessError::NoCodeDetected => StatusCode::NOT_FOUND,
                AccessError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            }
        }
    }

    impl IntoResponse for AccessError {
        fn into_response(self) -> Response {
            let body = serde_json::json!({
                "status": "error",
                "error": self.to_string(),
                "message": self.user_message(),
                "clearInputs": self.clears_inputs(),
            });
            (self.status_code(), Json(body)).into_response()
        }
    }

    impl IntoResponse for CheckInError {
        fn into_response(self) -> Response {
            match self {
                CheckInError::Access(e) => e.into_response(),
                CheckInError::Storage(e) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "status": "error",
                        "error": e.to_string(),
                        "message": "Check-in could not be saved, please retry",
                    })),
                )
                    .into_response(),
            }
        }
    }
}
