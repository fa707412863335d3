//! Export sinks and the dispatcher that feeds them

pub mod dead_letter;
pub mod dispatcher;
pub mod factory;
pub mod prometheus;
pub mod pushgateway;
pub mod webhook;

use dora_common::ErrorClassification;
use dora_domain::{AdapterError, DoraError, Result, SinkError, SinkSpec};
use reqwest::{Response, StatusCode};
use url::Url;

pub use dead_letter::{DeadLetter, DeadLetterLog};
pub use dispatcher::ExportDispatcher;
pub use factory::SinkFactory;
pub use self::prometheus::{PrometheusExporter, PrometheusSink};
pub use pushgateway::PushgatewaySink;
pub use webhook::{WebhookPayload, WebhookSink};

/// Required `http`/`https` endpoint of a push sink
pub(crate) fn sink_endpoint(spec: &SinkSpec) -> Result<Url> {
    let raw = spec
        .endpoint
        .as_deref()
        .ok_or_else(|| DoraError::Validation(format!("sink '{}': endpoint is required", spec.display_name())))?;
    let url = Url::parse(raw).map_err(|e| {
        DoraError::Validation(format!("sink '{}': invalid endpoint '{}': {}", spec.display_name(), raw, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DoraError::Validation(format!(
            "sink '{}': endpoint '{}' must use http or https",
            spec.display_name(),
            raw
        )));
    }
    Ok(url)
}

/// Transport failure of a push delivery
pub(crate) fn delivery_error(sink: &str, error: &AdapterError) -> SinkError {
    SinkError::Delivery { sink: sink.to_string(), message: error.to_string(), retryable: error.is_retryable() }
}

/// 2xx is delivered; 408, 429 and 5xx are retryable; anything else is not
pub(crate) fn check_response(sink: &str, response: &Response) -> std::result::Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = format!("HTTP {} {}", status.as_u16(), status.canonical_reason().unwrap_or("unknown status"));
    let retryable =
        status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;
    Err(SinkError::Delivery { sink: sink.to_string(), message, retryable })
}
