//! Engine wiring
//!
//! Builds every runtime component from an [`EngineConfig`] and owns their
//! lifecycle: the reconciliation controller, the collection scheduler, the
//! export dispatcher, the definition watcher and the exposition server.

use std::sync::Arc;

use dora_common::{Clock, SystemClock};
use dora_core::{execute, CredentialResolver, DefinitionSource, RetryPolicy, ScheduleRegistry, StatusStore};
use dora_domain::{CollectionError, DoraError, EngineConfig, MetricResult, Result};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::adapters::{AdapterRegistry, EnvCredentialResolver};
use crate::components::Components;
use crate::controller::{ReconcileReport, Reconciler};
use crate::definitions::{FileDefinitionSource, InMemoryDefinitionSource};
use crate::export::{DeadLetterLog, ExportDispatcher, PrometheusExporter, SinkFactory};
use crate::exposition::{ExpositionServer, ExpositionState};
use crate::http::HttpClient;
use crate::scheduling::CollectionScheduler;
use crate::status::InMemoryStatusStore;

/// Validation outcome of one definition document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionCheck {
    /// Definition name, or the file path when the document did not parse
    pub subject: String,
    pub error: Option<String>,
}

impl DefinitionCheck {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    definitions: Option<Arc<dyn DefinitionSource>>,
    clock: Option<Arc<dyn Clock>>,
    credentials: Option<Arc<dyn CredentialResolver>>,
}

impl EngineBuilder {
    /// Use a definition source instead of `controller.definitions_dir`
    #[must_use]
    pub fn definitions(mut self, source: Arc<dyn DefinitionSource>) -> Self {
        self.definitions = Some(source);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to resolving `env:NAME` references
    #[must_use]
    pub fn credentials(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(resolver);
        self
    }

    /// Validate the configuration and construct every component
    ///
    /// # Errors
    /// Configuration errors, an unreadable status snapshot, or metric
    /// registration failures.
    pub async fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let credentials = self.credentials.unwrap_or_else(|| Arc::new(EnvCredentialResolver));
        let http = HttpClient::from_config(&config.http)?;

        let exporter = Arc::new(PrometheusExporter::new()?);
        let components = Arc::new(Components::new(
            AdapterRegistry::with_defaults(http.clone(), credentials),
            SinkFactory::new(http, Arc::clone(&exporter)),
        ));

        let status: Arc<InMemoryStatusStore> = match &config.status.snapshot_path {
            Some(path) => Arc::new(InMemoryStatusStore::open(path.clone()).await?),
            None => Arc::new(InMemoryStatusStore::new()),
        };

        let dead_letters =
            Arc::new(DeadLetterLog::new(config.export.dead_letter_capacity, config.export.dead_letter_path.clone()));
        let dispatcher = Arc::new(ExportDispatcher::new(&config.export, Arc::clone(&dead_letters)));
        let registry = Arc::new(ScheduleRegistry::new(RetryPolicy::from_config(&config.scheduler)));

        let (definitions, watcher): (Arc<dyn DefinitionSource>, Option<Arc<FileDefinitionSource>>) =
            match (self.definitions, &config.controller.definitions_dir) {
                (Some(source), _) => (source, None),
                (None, Some(dir)) => {
                    let source = Arc::new(FileDefinitionSource::new(dir.clone()));
                    (Arc::clone(&source) as Arc<dyn DefinitionSource>, Some(source))
                }
                (None, None) => {
                    warn!("no definitions directory configured; starting with no definitions");
                    (Arc::new(InMemoryDefinitionSource::new()), None)
                }
            };

        let scheduler = CollectionScheduler::new(
            &config.scheduler,
            Arc::clone(&registry),
            Arc::clone(&status) as Arc<dyn StatusStore>,
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
        );

        let reconciler = Arc::new(
            Reconciler::new(
                &config.controller,
                Arc::clone(&definitions),
                Arc::clone(&components),
                Arc::clone(&registry),
                Arc::clone(&status) as Arc<dyn StatusStore>,
                Arc::clone(&dispatcher),
                Arc::clone(&clock),
            )
            .with_wake(scheduler.waker()),
        );

        Ok(Engine {
            config,
            clock,
            registry,
            status,
            exporter,
            dead_letters,
            dispatcher,
            definitions,
            watcher,
            scheduler,
            reconciler,
            cancel: CancellationToken::new(),
            background: Vec::new(),
            server: None,
        })
    }
}

/// The assembled DORA metrics engine
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<ScheduleRegistry>,
    status: Arc<InMemoryStatusStore>,
    exporter: Arc<PrometheusExporter>,
    dead_letters: Arc<DeadLetterLog>,
    dispatcher: Arc<ExportDispatcher>,
    definitions: Arc<dyn DefinitionSource>,
    watcher: Option<Arc<FileDefinitionSource>>,
    scheduler: CollectionScheduler,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
    server: Option<ExpositionServer>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("running", &self.scheduler.is_running())
            .field("exposition", &self.server.as_ref().map(ExpositionServer::local_addr))
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder { config, definitions: None, clock: None, credentials: None }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.registry
    }

    pub fn status(&self) -> &Arc<InMemoryStatusStore> {
        &self.status
    }

    pub fn exporter(&self) -> &Arc<PrometheusExporter> {
        &self.exporter
    }

    pub fn dispatcher(&self) -> &Arc<ExportDispatcher> {
        &self.dispatcher
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionSource> {
        &self.definitions
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &CollectionScheduler {
        &self.scheduler
    }

    /// Address of the exposition endpoint once started
    pub fn exposition_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(ExpositionServer::local_addr)
    }

    /// Start every background component
    ///
    /// # Errors
    /// The scheduler is already running or the exposition endpoint cannot
    /// be bound.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        self.cancel = CancellationToken::new();

        match self.reconciler.reconcile_once().await {
            Ok(report) => info!(valid = report.valid, invalid = report.invalid, entries = self.registry.len(), "initial reconcile complete"),
            Err(e) => error!(error = %e, "initial reconcile failed; retrying on the next resync"),
        }

        self.scheduler.start().await?;

        let reconciler = Arc::clone(&self.reconciler);
        let cancel = self.cancel.child_token();
        let status_changed = self.scheduler.status_changed();
        self.background.push(tokio::spawn(async move {
            reconciler.run(cancel, status_changed).await;
        }));

        if let Some(watcher) = &self.watcher {
            let watcher = Arc::clone(watcher);
            let cancel = self.cancel.child_token();
            self.background.push(tokio::spawn(async move {
                watcher.watch(cancel).await;
            }));
        }

        if self.config.exposition.enabled {
            let state = ExpositionState {
                exporter: Arc::clone(&self.exporter),
                registry: Arc::clone(&self.registry),
                status: Arc::clone(&self.status) as Arc<dyn StatusStore>,
                dead_letters: Arc::clone(&self.dead_letters),
                clock: Arc::clone(&self.clock),
                wake: self.scheduler.waker(),
            };
            self.server = Some(ExpositionServer::start(&self.config.exposition.listen_addr, state).await?);
        }

        info!("DORA engine started");
        Ok(())
    }

    /// Stop background work, giving runs and dispatches `shutdown_grace`
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down DORA engine");
        self.cancel.cancel();

        let scheduler_result = if self.scheduler.is_running() { self.scheduler.stop().await } else { Ok(()) };

        let grace = self.config.scheduler.shutdown_grace;
        if !self.dispatcher.shutdown(grace).await {
            warn!(dead_letters = self.dead_letters.total(), "pending deliveries were abandoned");
        }

        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task failed");
            }
        }

        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }

        scheduler_result.map_err(DoraError::from)?;
        info!("DORA engine stopped");
        Ok(())
    }

    /// Reconcile once and run every scheduled indicator immediately
    ///
    /// Runs are bounded by `worker_slots` and `run_timeout`. Results are
    /// applied to the status store and, with `export`, delivered to sinks
    /// before returning. Failed indicators are returned as failure results.
    #[instrument(skip(self))]
    pub async fn collect_once(&self, export: bool) -> Result<(ReconcileReport, Vec<MetricResult>)> {
        let report = self.reconciler.reconcile_once().await?;
        let plans = self.registry.plans();
        let cancel = self.cancel.child_token();
        let run_timeout = self.config.scheduler.run_timeout;
        let slots = self.config.scheduler.worker_slots.max(1);

        let mut results: Vec<MetricResult> = futures::stream::iter(plans)
            .map(|plan| {
                let cancel = cancel.clone();
                let now = self.clock.now();
                async move {
                    let window = plan.window_ending_at(now);
                    let outcome = match tokio::time::timeout(run_timeout, execute(&plan, window, &cancel)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(CollectionError::Timeout(run_timeout)),
                    };
                    if let Err(e) = &outcome {
                        warn!(key = %plan.key(), category = %e.category(), error = %e, "indicator failed");
                    }
                    plan.result(window, now, &outcome)
                }
            })
            .buffer_unordered(slots)
            .collect()
            .await;
        results.sort_by(|a, b| (&a.definition, a.indicator).cmp(&(&b.definition, b.indicator)));

        for result in &results {
            if let Err(e) = self.status.apply(result).await {
                error!(definition = %result.definition, indicator = %result.indicator, error = %e, "failed to record status");
            }
            if export {
                self.dispatcher.deliver(result).await;
            }
        }

        // publish the statuses of this pass
        self.reconciler.reconcile_once().await?;
        Ok((report, results))
    }

    /// Check every definition without starting anything
    ///
    /// Unparsable files of a definitions directory are reported by path.
    pub async fn check_definitions(&self) -> Result<Vec<DefinitionCheck>> {
        let mut checks = Vec::new();
        let definitions = match &self.watcher {
            Some(files) => {
                let mut parsed = Vec::new();
                for loaded in files.load_all().await? {
                    match loaded.definition {
                        Ok(definition) => parsed.push(definition),
                        Err(e) => checks.push(DefinitionCheck {
                            subject: loaded.path.display().to_string(),
                            error: Some(e.to_string()),
                        }),
                    }
                }
                parsed
            }
            None => self.definitions.list().await?,
        };

        for definition in &definitions {
            let error = self.reconciler.check(definition).err().map(|e| match e {
                DoraError::Validation(message) => message,
                other => other.to_string(),
            });
            checks.push(DefinitionCheck { subject: definition.name.clone(), error });
        }
        Ok(checks)
    }
}
