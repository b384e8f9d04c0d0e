//! Import facade: one entry point per assembly, plus folder batch mode.
//!
//! Drives the full pipeline for one CAD file: conversion, manifest
//! parsing, geometry loading, instance deduplication, batched hierarchy
//! assembly, normalization, and metadata attachment. Folder mode runs the
//! conversion stage under a bounded pool and assembles results into the
//! scene sequentially, since the host scene is single-threaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::{ConversionArtifacts, ConversionEngine, ConversionRequest, FreeCadEngine};
use crate::config::EngineConfig;
use crate::dedup::{Deduplicator, InstanceGroup};
use crate::error::{ImportError, SkipReason};
use crate::geometry::{MeshData, load_obj};
use crate::hierarchy::HierarchyAssembler;
use crate::manifest::{Manifest, PartId};
use crate::metadata::MetadataAttacher;
use crate::models::{FileType, ImportOptions};
use crate::normalize::{AxisConversion, Normalizer};
use crate::retessellate::Retessellator;
use crate::scene::{HostScene, ObjectId};

/// Result summary of one assembly import.
#[derive(Debug)]
pub struct ImportOutcome {
    /// Whether at least one object was placed.
    pub success: bool,
    /// Human-readable summary for the host UI or log.
    pub message: String,
    /// Number of scene objects created.
    pub created: usize,
    /// Parts skipped, each with exactly one reason.
    pub skipped: Vec<(PartId, SkipReason)>,
}

/// Owned state of a completed import, kept for follow-up operations.
#[derive(Debug)]
pub struct ImportSession {
    /// The validated manifest the scene was assembled from.
    pub manifest: Manifest,
    /// The CAD file this session imported.
    pub source_file: PathBuf,
    /// Normalizer used for placement; re-tessellation reuses it.
    pub normalizer: Normalizer,
    /// Scene handle per placed part.
    pub placed: BTreeMap<PartId, ObjectId>,
    /// Verified instance groups.
    pub instance_groups: Vec<InstanceGroup>,
}

impl ImportSession {
    /// Build a re-tessellator over this session's placed objects.
    pub fn retessellator(&self, engine: Arc<dyn ConversionEngine>) -> Retessellator<'_> {
        Retessellator::new(
            engine,
            &self.manifest,
            &self.source_file,
            &self.normalizer,
            &self.placed,
        )
    }
}

/// The assembly import pipeline.
pub struct AssemblyImporter {
    engine: Arc<dyn ConversionEngine>,
    config: EngineConfig,
}

impl AssemblyImporter {
    /// Build an importer backed by the FreeCAD command-line engine.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: Arc::new(FreeCadEngine::new(config.clone())),
            config,
        }
    }

    /// Build an importer over an explicit engine implementation.
    pub fn with_engine(engine: Arc<dyn ConversionEngine>, config: EngineConfig) -> Self {
        Self { engine, config }
    }

    /// The engine this importer drives.
    pub fn engine(&self) -> Arc<dyn ConversionEngine> {
        Arc::clone(&self.engine)
    }

    /// Import one assembly into the scene.
    pub async fn import_assembly(
        &self,
        scene: &mut dyn HostScene,
        path: &Path,
        options: &ImportOptions,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, ImportError> {
        self.import_session(scene, path, options, cancel)
            .await
            .map(|(outcome, _)| outcome)
    }

    /// Import one assembly, returning the session for follow-up
    /// operations such as re-tessellation.
    pub async fn import_session(
        &self,
        scene: &mut dyn HostScene,
        path: &Path,
        options: &ImportOptions,
        cancel: &CancellationToken,
    ) -> Result<(ImportOutcome, ImportSession), ImportError> {
        FileType::try_from_path(path)?;

        let request = ConversionRequest::full(path, options.quality);
        let artifacts = self.engine.convert(&request, cancel.clone()).await?;
        self.assemble_artifacts(scene, path, artifacts, options, cancel)
            .await
    }

    /// Import every supported file in a directory.
    ///
    /// Conversions run under a bounded pool; a failure converts to a
    /// per-file error and never aborts the rest. Scene assembly is
    /// sequential in sorted file order.
    pub async fn import_folder(
        &self,
        scene: &mut dyn HostScene,
        dir: &Path,
        options: &ImportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<(PathBuf, Result<ImportOutcome, ImportError>)>, ImportError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| FileType::from_path(p).is_some())
            .collect();
        files.sort();

        info!(
            dir = %dir.display(),
            files = files.len(),
            concurrency = self.config.max_folder_concurrency,
            "Starting folder import"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_folder_concurrency));
        let conversions = files.iter().map(|path| {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let request = ConversionRequest::full(path, options.quality);
            let cancel = cancel.clone();
            async move {
                // A closed semaphore cannot happen here; treat it as cancel.
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| ImportError::Cancelled)?;
                engine.convert(&request, cancel).await
            }
        });
        let converted = futures::future::join_all(conversions).await;

        let mut results = Vec::with_capacity(files.len());
        for (path, conversion) in files.into_iter().zip(converted) {
            let outcome = match conversion {
                Ok(artifacts) => self
                    .assemble_artifacts(scene, &path, artifacts, options, cancel)
                    .await
                    .map(|(outcome, _)| outcome),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "File conversion failed");
                    Err(e)
                }
            };
            results.push((path, outcome));
        }
        Ok(results)
    }

    /// The scene-side half of the pipeline, shared by single-file and
    /// folder imports.
    async fn assemble_artifacts(
        &self,
        scene: &mut dyn HostScene,
        source: &Path,
        artifacts: ConversionArtifacts,
        options: &ImportOptions,
        cancel: &CancellationToken,
    ) -> Result<(ImportOutcome, ImportSession), ImportError> {
        let manifest = Manifest::parse(&artifacts.manifest_path)?;

        let axis = if options.up_axis_convert && manifest.is_z_up() {
            AxisConversion::ZUpToYUp
        } else {
            AxisConversion::None
        };
        let normalizer = Normalizer::new(options.scale.factor() * manifest.scale(), axis);

        let (mut meshes, mut skip_map) =
            load_geometry(&manifest, &artifacts.geometry_dir, &normalizer);
        let instance_groups = Deduplicator::default().run(&mut meshes);

        let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
        let assembler =
            HierarchyAssembler::new(&manifest, &normalizer, options.hierarchy_mode, batch_size);
        let assembly = assembler
            .assemble(scene, &meshes, cancel, |progress| {
                info!(
                    batch = progress.batches,
                    processed = progress.processed,
                    total = progress.total,
                    "Assembly batch complete"
                );
            })
            .await?;

        MetadataAttacher::new(&manifest, source, options.quality).attach(
            scene,
            &assembly.placed,
            &instance_groups,
        );
        artifacts.cleanup().await;

        // The loader's reason wins for parts that failed both stages.
        for (id, reason) in assembly.skipped {
            skip_map.entry(id).or_insert(reason);
        }
        let skipped: Vec<(PartId, SkipReason)> = skip_map.into_iter().collect();

        let created = assembly.placed.len();
        let total = manifest.parts().len();
        let outcome = ImportOutcome {
            success: created > 0,
            message: format!(
                "Placed {created} of {total} parts from {}",
                source.display()
            ),
            created,
            skipped,
        };
        info!(
            file = %source.display(),
            created,
            skipped = outcome.skipped.len(),
            instances = instance_groups.len(),
            "Import complete"
        );

        let session = ImportSession {
            manifest,
            source_file: source.to_path_buf(),
            normalizer,
            placed: assembly.placed,
            instance_groups,
        };
        Ok((outcome, session))
    }
}

/// Load and normalize every leaf part's geometry. Failures become
/// per-part skips, never pipeline errors.
fn load_geometry(
    manifest: &Manifest,
    geometry_dir: &Path,
    normalizer: &Normalizer,
) -> (
    BTreeMap<PartId, Arc<MeshData>>,
    BTreeMap<PartId, SkipReason>,
) {
    let mut meshes = BTreeMap::new();
    let mut skips = BTreeMap::new();

    for part in manifest.parts() {
        let Some(file) = &part.geometry_file else {
            continue;
        };
        let path = if file.is_absolute() {
            file.clone()
        } else {
            geometry_dir.join(file)
        };
        match load_obj(&path) {
            Ok(mut mesh) => {
                normalizer.apply_to_mesh(&mut mesh);
                meshes.insert(part.id.clone(), Arc::new(mesh));
            }
            Err(reason) => {
                warn!(part = %part.id, %reason, "Geometry load failed");
                skips.insert(part.id.clone(), reason);
            }
        }
    }
    (meshes, skips)
}
