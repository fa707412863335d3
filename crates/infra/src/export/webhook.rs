//! Webhook push sink: POSTs each result as JSON

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dora_core::{Sink, SinkMode};
use dora_domain::{
    ErrorCategory, GroupValue, Indicator, MetricOutcome, MetricResult, PerformanceLevel, Result,
    SinkError, SinkSpec, Unit,
};
use reqwest::Method;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use super::{check_response, delivery_error, sink_endpoint};
use crate::http::HttpClient;

/// Sink type name
pub const TYPE: &str = "webhook";

/// JSON document sent to the webhook
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub run_id: Uuid,
    pub definition: &'a str,
    pub indicator: Indicator,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Distribution statistics plus `sample_count`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<&'static str, f64>,
    #[serde(skip_serializing_if = "<[GroupValue]>::is_empty")]
    pub groups: &'a [GroupValue],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_level: Option<PerformanceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: &'a BTreeMap<String, String>,
}

impl<'a> WebhookPayload<'a> {
    pub fn new(result: &'a MetricResult, labels: &'a BTreeMap<String, String>) -> Self {
        let mut payload = Self {
            run_id: result.run_id,
            definition: &result.definition,
            indicator: result.indicator,
            window_start: result.window.start,
            window_end: result.window.end,
            computed_at: result.computed_at,
            status: "success",
            value: None,
            values: BTreeMap::new(),
            groups: &[],
            unit: None,
            performance_level: None,
            error_category: None,
            error: None,
            labels,
        };

        match &result.outcome {
            MetricOutcome::Success { value, performance_level } => {
                payload.value = Some(value.value);
                payload.unit = Some(value.unit);
                payload.performance_level = Some(*performance_level);
                payload.groups = value.groups.as_slice();
                #[allow(clippy::cast_precision_loss)]
                payload.values.insert("sample_count", value.sample_count as f64);
                if let Some(summary) = &value.summary {
                    payload.values.extend(summary.statistics());
                }
            }
            MetricOutcome::Failure { error } => {
                payload.status = "failure";
                payload.error_category = Some(error.category);
                payload.error = Some(error.message.as_str());
            }
        }
        payload
    }
}

/// POSTs results to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    name: String,
    endpoint: Url,
    http: HttpClient,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, endpoint: Url, http: HttpClient) -> Self {
        Self { name: name.into(), endpoint, http: http.with_max_attempts(1) }
    }

    pub fn from_spec(spec: &SinkSpec, http: HttpClient) -> Result<Self> {
        let endpoint = sink_endpoint(spec)?;
        Ok(Self::new(spec.display_name(), endpoint, http))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        SinkMode::Push
    }

    async fn deliver(&self, result: &MetricResult, labels: &BTreeMap<String, String>) -> std::result::Result<(), SinkError> {
        let body = serde_json::to_vec(&WebhookPayload::new(result, labels))
            .map_err(|e| SinkError::Encoding { sink: self.name.clone(), message: e.to_string() })?;

        let request = self
            .http
            .request(Method::POST, self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = self.http.send(request).await.map_err(|e| delivery_error(&self.name, &e))?;
        check_response(&self.name, &response)
    }
}
