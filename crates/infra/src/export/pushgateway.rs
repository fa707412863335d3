//! Pushgateway push sink
//!
//! Each (definition, indicator) owns one grouping key; a delivery replaces
//! the whole group with PUT and a retraction deletes it.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use dora_core::{Sink, SinkMode};
use dora_domain::constants::{LABEL_SERVICE, LABEL_TEAM};
use dora_domain::{EntryKey, MetricOutcome, MetricResult, Result, SinkError, SinkSpec};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use reqwest::Method;
use url::Url;

use super::prometheus::CONTENT_TYPE;
use super::{check_response, delivery_error, sink_endpoint};
use crate::http::HttpClient;

/// Sink type name
pub const TYPE: &str = "pushgateway";

const JOB: &str = "dora";

/// Pushes results to a Prometheus Pushgateway
#[derive(Debug, Clone)]
pub struct PushgatewaySink {
    name: String,
    endpoint: Url,
    http: HttpClient,
}

impl PushgatewaySink {
    pub fn new(name: impl Into<String>, endpoint: Url, http: HttpClient) -> Self {
        Self { name: name.into(), endpoint, http: http.with_max_attempts(1) }
    }

    pub fn from_spec(spec: &SinkSpec, http: HttpClient) -> Result<Self> {
        let endpoint = sink_endpoint(spec)?;
        Ok(Self::new(spec.display_name(), endpoint, http))
    }

    /// `{endpoint}/metrics/job/dora/definition/{definition}/indicator/{indicator}`
    pub fn group_url(&self, key: &EntryKey) -> std::result::Result<Url, SinkError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| SinkError::Config(format!("sink '{}': endpoint cannot be a base URL", self.name)))?
            .pop_if_empty()
            .extend(["metrics", "job", JOB, "definition", key.definition.as_str(), "indicator", key.indicator.as_str()]);
        Ok(url)
    }

    fn encoding_error(&self, message: impl std::fmt::Display) -> SinkError {
        SinkError::Encoding { sink: self.name.clone(), message: message.to_string() }
    }

    /// Text exposition body for one result; static labels become constant labels
    pub fn render(&self, result: &MetricResult, labels: &BTreeMap<String, String>) -> std::result::Result<String, SinkError> {
        let const_labels: HashMap<String, String> = labels.clone().into_iter().collect();
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(const_labels.clone());
        let gauge = |name: &str, help: &str| -> std::result::Result<Gauge, SinkError> {
            let gauge = Gauge::with_opts(opts(name, help)).map_err(|e| self.encoding_error(e))?;
            registry.register(Box::new(gauge.clone())).map_err(|e| self.encoding_error(e))?;
            Ok(gauge)
        };
        let gauge_vec = |name: &str, help: &str, label_names: &[&str]| -> std::result::Result<GaugeVec, SinkError> {
            let gauge = GaugeVec::new(opts(name, help), label_names).map_err(|e| self.encoding_error(e))?;
            registry.register(Box::new(gauge.clone())).map_err(|e| self.encoding_error(e))?;
            Ok(gauge)
        };

        let success = gauge("dora_collection_success", "Whether the pushed collection run succeeded")?;
        match &result.outcome {
            MetricOutcome::Success { value, performance_level } => {
                success.set(1.0);
                gauge_vec("dora_indicator_value", "Indicator value", &["unit"])?
                    .with_label_values(&[value.unit.as_str()])
                    .set(value.value);
                gauge("dora_performance_level", "DORA performance level (1 = Low .. 4 = Elite)")?
                    .set(f64::from(performance_level.score()));
                #[allow(clippy::cast_precision_loss)]
                gauge("dora_last_success_timestamp_seconds", "Unix time of the pushed success")?
                    .set(result.computed_at.timestamp() as f64);

                if let Some(summary) = &value.summary {
                    let statistic = gauge_vec("dora_indicator_statistic", "Distribution statistics", &["statistic"])?;
                    for (name, stat) in summary.statistics() {
                        statistic.with_label_values(&[name]).set(stat);
                    }
                }

                if !value.groups.is_empty() {
                    // a static team label is already a constant label
                    let static_team = labels.contains_key(LABEL_TEAM);
                    let group_labels: &[&str] = if static_team { &[LABEL_SERVICE] } else { &[LABEL_SERVICE, LABEL_TEAM] };
                    let groups =
                        gauge_vec("dora_indicator_group_value", "Indicator value per service and team", group_labels)?;
                    for group in &value.groups {
                        let service = group.labels.get(LABEL_SERVICE).map(String::as_str).unwrap_or_default();
                        if static_team {
                            groups.with_label_values(&[service]).set(group.value);
                        } else {
                            let team = group.labels.get(LABEL_TEAM).map(String::as_str).unwrap_or_default();
                            groups.with_label_values(&[service, team]).set(group.value);
                        }
                    }
                }
            }
            MetricOutcome::Failure { .. } => success.set(0.0),
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer).map_err(|e| self.encoding_error(e))?;
        String::from_utf8(buffer).map_err(|e| self.encoding_error(e))
    }
}

#[async_trait]
impl Sink for PushgatewaySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        SinkMode::Push
    }

    async fn deliver(&self, result: &MetricResult, labels: &BTreeMap<String, String>) -> std::result::Result<(), SinkError> {
        let body = self.render(result, labels)?;
        let url = self.group_url(&EntryKey::new(result.definition.clone(), result.indicator))?;
        let request = self.http.request(Method::PUT, url).header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE).body(body);
        let response = self.http.send(request).await.map_err(|e| delivery_error(&self.name, &e))?;
        check_response(&self.name, &response)
    }

    async fn retract(&self, key: &EntryKey) -> std::result::Result<(), SinkError> {
        let request = self.http.request(Method::DELETE, self.group_url(key)?);
        let response = self.http.send(request).await.map_err(|e| delivery_error(&self.name, &e))?;
        check_response(&self.name, &response)
    }
}
