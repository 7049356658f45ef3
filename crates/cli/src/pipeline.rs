//! The pull pipeline: token, manifest, layers, extraction.
//!
//! Steps run strictly in sequence. A failure before the first layer ends the
//! run with a [`PipelineError`]; a failure inside a layer is logged, counted
//! and the next layer is attempted.

use ocipull_oci::{
    ExtractReport, HttpFetcher, LayerDescriptor, PullToken, download_blob, extract_layer,
    fetch_manifest, fetch_token_for_service, parse_layers, verify_digest,
};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PullConfig;
use crate::errors::PipelineError;
use crate::progress;

/// Outcome of a run that got as far as the layer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Layers listed by the manifest.
    pub layers_total: usize,
    /// Layers downloaded and extracted.
    pub layers_extracted: usize,
    /// Layers given up on.
    pub layers_failed: usize,
    /// Archive entries that were skipped or could not be written.
    pub entries_failed: usize,
}

impl PullSummary {
    /// Whether every layer made it to disk untouched.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.layers_failed == 0 && self.entries_failed == 0
    }
}

/// Pull the configured image and extract its layers into `config.dest`.
#[instrument(name = "pull", skip_all, fields(image = %config.reference()))]
pub async fn run(http: &HttpFetcher, config: &PullConfig) -> Result<PullSummary, PipelineError> {
    info!(
        registry = %config.registry,
        repo = %config.repo,
        tag = %config.tag,
        platform = %config.platform,
        dest = %config.dest.display(),
        "Starting pull"
    );

    let token =
        fetch_token_for_service(http, &config.registry, &config.repo, &config.token_service).await;
    if token.is_none() {
        if !config.anonymous {
            return Err(PipelineError::token_unavailable(&config.registry));
        }
        warn!("No pull token available, continuing anonymously");
    }

    let manifest = fetch_manifest(
        http,
        &config.registry,
        &config.repo,
        &config.tag,
        &config.platform,
        token.as_ref(),
    )
    .await
    .ok_or_else(|| PipelineError::manifest_unavailable(&config.repo, &config.tag))?;
    progress::manifest_fetched();

    let layers = parse_layers(&manifest);
    if layers.is_empty() {
        return Err(PipelineError::NoLayers);
    }
    info!(count = layers.len(), "Found layers");

    prepare_dir(&config.dest).await?;
    prepare_dir(&config.work_dir).await?;

    let mut summary = PullSummary {
        layers_total: layers.len(),
        ..PullSummary::default()
    };

    for (ordinal, layer) in layers.iter().enumerate() {
        info!(
            ordinal,
            digest = layer.digest.as_deref().unwrap_or("<none>"),
            size = layer.size,
            media_type = layer.media_type.as_deref().unwrap_or("<none>"),
            "Layer"
        );

        match pull_layer(http, config, token.as_ref(), ordinal, layer).await {
            Ok(report) => {
                summary.layers_extracted += 1;
                summary.entries_failed += report.skipped + report.failed;
            }
            Err(e) => {
                error!(ordinal, error = %e, "Layer failed, continuing with the next one");
                summary.layers_failed += 1;
            }
        }
    }

    progress::complete();
    info!(
        extracted = summary.layers_extracted,
        failed = summary.layers_failed,
        "Pull finished"
    );
    Ok(summary)
}

async fn prepare_dir(path: &Path) -> Result<(), PipelineError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| PipelineError::destination(path, e))
}

/// Download, check and extract a single layer.
async fn pull_layer(
    http: &HttpFetcher,
    config: &PullConfig,
    token: Option<&PullToken>,
    ordinal: usize,
    layer: &LayerDescriptor,
) -> ocipull_oci::Result<ExtractReport> {
    let digest = layer
        .digest
        .as_deref()
        .ok_or(ocipull_oci::Error::MissingDigest { ordinal })?;

    let temp = tempfile::Builder::new()
        .prefix(&format!("layer-{ordinal}-"))
        .suffix(".tar.gz")
        .tempfile_in(&config.work_dir)?;

    let download = download_blob(
        http,
        &config.registry,
        &config.repo,
        digest,
        token,
        temp.path(),
    )
    .await?;

    if !download.is_ok() || download.bytes_written == 0 {
        return Err(ocipull_oci::Error::blob_fetch(digest, download.status));
    }

    if config.verify {
        verify_digest(digest, &download)?;
    } else {
        debug!(%digest, "Digest verification disabled");
    }

    if layer.size != 0 && layer.size != download.bytes_written {
        warn!(
            ordinal,
            declared = layer.size,
            received = download.bytes_written,
            "Layer size differs from the manifest"
        );
    }

    let (archive, _temp) = stage_archive(temp, config, ordinal)?;

    progress::extracting(ordinal);
    let report = extract_layer(archive, config.dest.clone()).await?;
    if !report.is_clean() {
        warn!(
            ordinal,
            skipped = report.skipped,
            failed = report.failed,
            "Some layer entries were not extracted"
        );
    }
    Ok(report)
}

/// Decide where the downloaded archive lives while it is extracted.
///
/// Kept layers are renamed to `layer-N.tar.gz` in the work directory; others
/// stay as a temp file that is removed when the returned guard drops.
fn stage_archive(
    temp: NamedTempFile,
    config: &PullConfig,
    ordinal: usize,
) -> ocipull_oci::Result<(PathBuf, Option<NamedTempFile>)> {
    if config.keep_layers {
        let kept = config.work_dir.join(progress::layer_file_name(ordinal));
        temp.persist(&kept).map_err(|e| e.error)?;
        debug!(path = %kept.display(), "Keeping layer archive");
        Ok((kept, None))
    } else {
        Ok((temp.path().to_path_buf(), Some(temp)))
    }
}
