//! Builds sinks from a definition's sink specs

use std::sync::Arc;

use dora_core::Sink;
use dora_domain::{DoraError, Result, SinkSpec};

use super::prometheus::{self, PrometheusExporter, PrometheusSink};
use super::pushgateway::{self, PushgatewaySink};
use super::webhook::{self, WebhookSink};
use super::sink_endpoint;
use crate::http::HttpClient;

/// Sink `type` → sink instance
#[derive(Debug, Clone)]
pub struct SinkFactory {
    http: HttpClient,
    exporter: Arc<PrometheusExporter>,
}

impl SinkFactory {
    pub fn new(http: HttpClient, exporter: Arc<PrometheusExporter>) -> Self {
        Self { http, exporter }
    }

    pub fn exporter(&self) -> &Arc<PrometheusExporter> {
        &self.exporter
    }

    /// Supported sink types
    pub fn kinds(&self) -> [&'static str; 3] {
        [prometheus::TYPE, webhook::TYPE, pushgateway::TYPE]
    }

    /// Check a spec without building it
    pub fn check(&self, spec: &SinkSpec) -> std::result::Result<(), String> {
        match spec.kind.as_str() {
            prometheus::TYPE => Ok(()),
            webhook::TYPE | pushgateway::TYPE => sink_endpoint(spec).map(|_| ()).map_err(|e| match e {
                DoraError::Validation(message) => message,
                other => other.to_string(),
            }),
            other => Err(format!("unknown sink type '{other}' (expected one of {})", self.kinds().join(", "))),
        }
    }

    pub fn build(&self, spec: &SinkSpec) -> Result<Arc<dyn Sink>> {
        let sink: Arc<dyn Sink> = match spec.kind.as_str() {
            prometheus::TYPE => Arc::new(PrometheusSink::new(spec.display_name(), Arc::clone(&self.exporter))),
            webhook::TYPE => Arc::new(WebhookSink::from_spec(spec, self.http.clone())?),
            pushgateway::TYPE => Arc::new(PushgatewaySink::from_spec(spec, self.http.clone())?),
            other => return Err(DoraError::Validation(format!("unknown sink type '{other}'"))),
        };
        Ok(sink)
    }

    /// Every enabled sink of a definition
    pub fn build_enabled(&self, specs: &[SinkSpec]) -> Result<Vec<Arc<dyn Sink>>> {
        specs.iter().filter(|spec| spec.enabled).map(|spec| self.build(spec)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> SinkFactory {
        SinkFactory::new(HttpClient::new().unwrap(), Arc::new(PrometheusExporter::new().unwrap()))
    }

    #[test]
    fn check_requires_push_endpoints() {
        let factory = factory();
        assert!(factory.check(&SinkSpec::new("prometheus", None)).is_ok());
        assert!(factory.check(&SinkSpec::new("webhook", Some("https://hooks.local/dora".into()))).is_ok());

        let missing = factory.check(&SinkSpec::new("webhook", None)).unwrap_err();
        assert!(missing.contains("endpoint"));
        assert!(factory.check(&SinkSpec::new("pushgateway", Some("ftp://gw".into()))).is_err());
        assert!(factory.check(&SinkSpec::new("kafka", None)).unwrap_err().contains("unknown sink type"));
    }

    #[test]
    fn build_enabled_skips_disabled_sinks() {
        let mut disabled = SinkSpec::new("webhook", Some("http://hooks.local".into()));
        disabled.enabled = false;
        let specs = vec![SinkSpec::new("prometheus", None), disabled];

        let sinks = factory().build_enabled(&specs).unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].name(), "prometheus");
    }
}
