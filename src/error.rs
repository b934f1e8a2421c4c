use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Faults that end a request with a server error.
///
/// Validation and authentication failures are not errors at this level:
/// they are reported back through the re-rendered form.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),

    /// Storage disagrees with itself, e.g. a freshly created account cannot be authenticated.
    #[error("inconsistent account state: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// The error with every underlying cause, outermost first.
    pub fn chain_message(&self) -> String {
        match self {
            AppError::Internal(e) => format!("{e:#}"),
            other => other.to_string(),
        }
    }

    pub fn sanitized_message(&self) -> &'static str {
        "A server error occurred. Please try again later."
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::Inconsistent(detail) => {
                error!(%detail, "account state inconsistency");
            }
            other => {
                error!(error = %other.chain_message(), "request failed");
            }
        }
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message().to_string()
        };
        let body = format!(
            "<h1>Server Error ({})</h1><p>{}</p>",
            status.as_u16(),
            escape(&message)
        );
        (status, Html(body)).into_response()
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_is_a_server_error() {
        let errors = [
            AppError::Inconsistent("account 1".into()),
            AppError::Internal(anyhow::anyhow!("pool closed")),
        ];
        for err in errors {
            assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn chain_message_keeps_underlying_cause() {
        let cause = anyhow::anyhow!("duplicate key value violates unique constraint");
        let err = AppError::from(cause.context("insert account"));
        let message = err.chain_message();
        assert!(message.starts_with("insert account"), "{message}");
        assert!(message.contains("duplicate key value"), "{message}");
    }

    #[test]
    fn message_is_escaped() {
        assert_eq!(escape("<b>&"), "&lt;b&gt;&amp;");
    }
}
