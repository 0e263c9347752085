use crate::{
    artifact::TemporaryArtifact,
    catalog::ClassCatalog,
    config::{HandlerConfig, Variant},
    detection::DetectionBackend,
    error::{FetchError, HandlerError, InvocationError},
    fetch::fetch_artifact,
    normalize::{self, LabelRecord, ResponseBody},
    render,
    router::{Handler, InvocationContext},
    telemetry::Metrics,
};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::time::timeout;
use tracing::instrument;

/// Where one invocation writes its outputs. Every name carries the
/// invocation's stem, so concurrent invocations never share a file.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub image: PathBuf,
    pub label: Option<PathBuf>,
    pub transcript: PathBuf,
}

impl OutputPaths {
    pub fn new(run_dir: &Path, stem: &str, variant: Variant) -> Self {
        let transcript = run_dir.join(format!("label_analysis-{}.txt", stem));
        match variant {
            Variant::FullResult => Self {
                image: run_dir.join(format!("result-{}.jpg", stem)),
                label: None,
                transcript,
            },
            Variant::LabelFile => Self {
                image: run_dir.join(format!("{}.jpg", stem)),
                label: Some(run_dir.join("labels").join(format!("{}.txt", stem))),
                transcript,
            },
        }
    }

    fn create_dirs(&self) -> Result<(), HandlerError> {
        let dirs = [Some(&self.image), self.label.as_ref(), Some(&self.transcript)];
        for dir in dirs.into_iter().flatten().filter_map(|path| path.parent()) {
            std::fs::create_dir_all(dir).map_err(|source| HandlerError::Output {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Fetches the task's image, runs detection on a blocking worker and
/// normalises the result.
pub struct DetectionHandler {
    config: HandlerConfig,
    backend: Arc<dyn DetectionBackend>,
    catalog: Arc<ClassCatalog>,
    metrics: Option<Arc<Metrics>>,
}

impl DetectionHandler {
    pub fn new(
        config: HandlerConfig,
        backend: Arc<dyn DetectionBackend>,
        catalog: Arc<ClassCatalog>,
    ) -> Self {
        Self {
            config,
            backend,
            catalog,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn run(
        &self,
        ctx: &InvocationContext,
        artifact: &TemporaryArtifact,
    ) -> Result<ResponseBody, HandlerError> {
        let fetch_timeout = self.config.fetch_timeout();
        let started = Instant::now();
        timeout(
            fetch_timeout,
            fetch_artifact(
                ctx,
                &self.config.image_key,
                artifact.path(),
                self.config.chunk_size,
            ),
        )
        .await
        .map_err(|_| FetchError::Timeout(fetch_timeout))??;
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch_duration(started.elapsed().as_millis() as u64);
        }

        let outputs = OutputPaths::new(
            &self.config.run_dir(),
            artifact.stem(),
            self.config.variant,
        );
        let input = artifact.path().to_path_buf();
        let backend = self.backend.clone();
        let catalog = self.catalog.clone();
        let variant = self.config.variant;

        let inference_timeout = self.config.inference_timeout();
        let started = Instant::now();
        let job = tokio::task::spawn_blocking(move || {
            process(backend.as_ref(), &catalog, &input, &outputs, variant)
        });
        let body = timeout(inference_timeout, job)
            .await
            .map_err(|_| InvocationError::Timeout(inference_timeout))?
            .map_err(|e| InvocationError::Worker(e.to_string()))??;
        if let Some(metrics) = &self.metrics {
            metrics.record_inference_duration(
                started.elapsed().as_millis() as u64,
                self.backend.name(),
            );
        }

        Ok(body)
    }
}

#[async_trait]
impl Handler for DetectionHandler {
    #[instrument(skip_all, fields(task_id = %ctx.task().id))]
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerError> {
        let artifact = TemporaryArtifact::allocate(&self.config.work_dir, ctx.task().format())?;

        let result = self.run(ctx, &artifact).await;
        if let Err(e) = artifact.close() {
            tracing::warn!("{}", e);
        }

        let body = result?;
        tracing::info!(
            "Detected {} object classes in {}",
            body.objects_with_counts.len(),
            body.image
        );
        Ok(serde_json::to_value(body)?)
    }
}

fn process(
    backend: &dyn DetectionBackend,
    catalog: &ClassCatalog,
    input: &Path,
    outputs: &OutputPaths,
    variant: Variant,
) -> Result<ResponseBody, HandlerError> {
    outputs.create_dirs()?;

    let detections = backend.detect(input)?;
    tracing::debug!("{} returned {} detections", backend.name(), detections.len());
    render::save_annotated(input, &detections, catalog, &outputs.image)?;

    match (variant, &outputs.label) {
        (Variant::LabelFile, Some(label_path)) => {
            normalize::write_label_file(label_path, &detections).map_err(|source| {
                HandlerError::Output {
                    path: label_path.clone(),
                    source,
                }
            })?;
            let analysis =
                normalize::analyze_label_file(catalog, label_path, &outputs.transcript)?;

            Ok(ResponseBody {
                image: file_name(&outputs.image),
                label: Some(file_name(label_path)),
                objects_with_counts: analysis.objects_with_counts,
                detections: None,
            })
        }
        _ => {
            let records = detections
                .iter()
                .enumerate()
                .map(|(index, detection)| LabelRecord::from_detection(index, detection))
                .collect();
            let analysis = normalize::analyze(catalog, records)?;
            normalize::write_transcript(&outputs.transcript, &analysis.transcript).map_err(
                |source| HandlerError::Output {
                    path: outputs.transcript.clone(),
                    source,
                },
            )?;

            Ok(ResponseBody {
                image: file_name(&outputs.image),
                label: None,
                objects_with_counts: analysis.objects_with_counts,
                detections: Some(detections),
            })
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
