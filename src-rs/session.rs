//! Dispatches UI messages onto the plugin core.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::annotate::annotate_top_k;
use crate::bridge::{CoreMessage, PredictionResult, TopKProbability, UiMessage};
use crate::config::Settings;
use crate::endpoint::ModelEndpointStore;
use crate::predict::apply_predictions;
use crate::raster::{rasterize, CancelToken};
use crate::scene::{DevResources, ExportFormat, Exporter, NodeId, SceneGraph};
use crate::selection::expand;
use crate::storage::ClientStorage;

pub const MODEL_SAVED_NOTICE: &str = "Changes to the TFJS model have been saved.";
pub const NOTICE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const PREDICT_CANCELLED_NOTICE: &str = "Prediction cancelled. No layers were sent.";

/// The embedded panel plus the host toast surface.
pub trait UiSurface {
    fn post(&self, message: &CoreMessage) -> Result<()>;

    fn notify(&self, message: &str, timeout: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Session<'a, H, S, U> {
    host: &'a H,
    endpoints: ModelEndpointStore<S>,
    ui: &'a U,
    settings: &'a Settings,
    filename: String,
}

impl<'a, H, S, U> Session<'a, H, S, U>
where
    H: SceneGraph + Exporter + DevResources,
    S: ClientStorage,
    U: UiSurface,
{
    pub fn new(
        host: &'a H,
        storage: S,
        ui: &'a U,
        settings: &'a Settings,
        filename: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let endpoints =
            ModelEndpointStore::new(storage, filename.clone(), settings.default_model_url.clone());
        Self {
            host,
            endpoints,
            ui,
            settings,
            filename,
        }
    }

    pub fn start(&self) -> Result<()> {
        info!(filename = %self.filename, ui_height = self.settings.ui_height(), "session started");
        self.ui.post(&CoreMessage::handshake())
    }

    /// Handles one message. Only a failure to reach the UI is returned as an error.
    pub async fn handle(&self, message: UiMessage, cancel: &CancelToken) -> Result<Flow> {
        debug!(kind = message.kind(), "ui message");
        match message {
            UiMessage::ClickPredictButton => self.predict(cancel).await?,
            UiMessage::Response { payload } => self.apply(&payload),
            UiMessage::Init => {
                let url = self.current_model_url().await;
                self.ui.post(&CoreMessage::model_url(url))?;
            }
            UiMessage::ResetModelUrl => {
                if let Err(err) = self.endpoints.reset().await {
                    warn!(error = %err, "could not clear stored model URL");
                }
                self.ui
                    .post(&CoreMessage::model_url(self.endpoints.default_url()))?;
            }
            UiMessage::UpdateModelUrl { payload } => match self.endpoints.update(&payload).await {
                Ok(()) => self.ui.notify(MODEL_SAVED_NOTICE, NOTICE_TIMEOUT),
                Err(err) => {
                    warn!(error = %err, "could not save model URL");
                    self.ui
                        .notify(&format!("Could not save the model URL: {err}"), NOTICE_TIMEOUT);
                }
            },
            UiMessage::Top3Probabilities { id, payload } => self.annotate(&id, &payload).await,
            UiMessage::Close => {
                info!("session closed by ui");
                return Ok(Flow::Close);
            }
        }
        Ok(Flow::Continue)
    }

    async fn predict(&self, cancel: &CancelToken) -> Result<()> {
        let selection = self.host.selection();
        if selection.is_empty() {
            info!("predict requested with empty selection");
            return self.ui.post(&CoreMessage::EmptySelection);
        }
        let nodes = expand(
            self.host,
            &selection,
            &self.settings.excluded_types,
            self.settings.top_level_only,
        );
        let batch = rasterize(self.host, &nodes, ExportFormat::Jpg, cancel).await;
        if batch.cancelled {
            // Never an empty processingRequest: its empty response renames every candidate.
            warn!(rendered = batch.rendered.len(), "predict request cancelled; nothing sent");
            self.ui.notify(PREDICT_CANCELLED_NOTICE, NOTICE_TIMEOUT);
            return Ok(());
        }
        info!(
            candidates = nodes.len(),
            rendered = batch.rendered.len(),
            skipped = batch.skipped.len(),
            "selection rasterized"
        );
        self.ui.post(&CoreMessage::ProcessingRequest {
            data: batch.rendered,
            filename: self.filename.clone(),
        })
    }

    fn apply(&self, predictions: &[PredictionResult]) {
        let started = Instant::now();
        let nodes = expand(
            self.host,
            &self.host.selection(),
            &self.settings.excluded_types,
            false,
        );
        let report = apply_predictions(self.host, &nodes, predictions);
        info!(
            nodes = nodes.len(),
            predicted = report.predicted,
            exceptions = report.exceptions,
            parents = report.parents_relabelled,
            missing = report.missing,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "renamed layers"
        );
    }

    async fn annotate(&self, id: &NodeId, top_k: &[TopKProbability]) {
        if self.settings.debug {
            debug!(node = %id, payload = ?top_k, "top3Probabilities");
        }
        match annotate_top_k(self.host, id, top_k).await {
            Ok(report) => debug!(node = %id, ?report, "annotated node"),
            Err(err) => warn!(node = %id, error = %err, "could not annotate node"),
        }
    }

    async fn current_model_url(&self) -> String {
        match self.endpoints.current().await {
            Ok(url) => {
                info!(%url, "current model");
                url
            }
            Err(err) => {
                warn!(error = %err, "could not read stored model URL; using default");
                self.endpoints.default_url().to_string()
            }
        }
    }
}
