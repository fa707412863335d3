//! Conversions from external infrastructure errors into domain errors.

use dora_domain::{AdapterError, DoraError};
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub DoraError);

impl From<InfraError> for DoraError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<DoraError> for InfraError {
    fn from(value: DoraError) -> Self {
        InfraError(value)
    }
}

/// Transport failures as seen by a source adapter.
pub trait IntoAdapterError {
    fn into_adapter_error(self) -> AdapterError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → AdapterError */
/* -------------------------------------------------------------------------- */

impl IntoAdapterError for HttpError {
    fn into_adapter_error(self) -> AdapterError {
        if self.is_timeout() {
            return AdapterError::transient("HTTP request timed out");
        }

        if self.is_connect() {
            return AdapterError::transient("HTTP connection failure");
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => AdapterError::auth(message),
                429 => AdapterError::rate_limit(message, None),
                400..=499 => AdapterError::permanent(message),
                _ => AdapterError::transient(message),
            };
        }

        if self.is_builder() {
            return AdapterError::permanent(format!("invalid HTTP request: {self}"));
        }

        if self.is_decode() {
            return AdapterError::permanent(format!("unexpected response body: {self}"));
        }

        AdapterError::transient(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(DoraError::Adapter(value.into_adapter_error()))
    }
}

/* -------------------------------------------------------------------------- */
/* std::io::Error / serde_json::Error → DoraError */
/* -------------------------------------------------------------------------- */

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        InfraError(DoraError::Store(format!("I/O failure: {value}")))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(DoraError::Store(format!("JSON encoding failure: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use dora_common::ErrorClassification;
    use reqwest::{Client, StatusCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn status_error(status: StatusCode) -> HttpError {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(status)).mount(&server).await;

        let client = Client::builder().no_proxy().build().unwrap();
        client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err()
    }

    #[tokio::test]
    async fn http_status_401_maps_to_auth_error() {
        match status_error(StatusCode::UNAUTHORIZED).await.into_adapter_error() {
            AdapterError::Auth(msg) => assert!(msg.contains("401")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_status_503_maps_to_transient_error() {
        let err = status_error(StatusCode::SERVICE_UNAVAILABLE).await.into_adapter_error();
        assert!(matches!(err, AdapterError::TransientNetwork(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn http_status_422_maps_to_permanent_error() {
        let err = status_error(StatusCode::UNPROCESSABLE_ENTITY).await.into_adapter_error();
        assert!(matches!(err, AdapterError::PermanentConfig(_)));
    }

    #[test]
    fn io_errors_become_store_errors() {
        let err: DoraError =
            InfraError::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")).into();
        assert!(matches!(err, DoraError::Store(msg) if msg.contains("denied")));
    }
}
