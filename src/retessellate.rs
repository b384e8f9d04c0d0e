//! Per-part re-tessellation.
//!
//! Replaces a placed object's geometry with a fresh conversion of its
//! source part at a different quality, leaving transform, hierarchy, and
//! host attributes untouched. Each target runs a small state machine; on
//! failure the prior geometry stays and the bridge error is surfaced
//! through the `Failed` state.
//!
//! A re-tessellated object receives its own geometry payload, so any
//! instance sharing it participated in ends for that object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::{ConversionEngine, ConversionRequest};
use crate::error::ImportError;
use crate::geometry::load_obj;
use crate::manifest::{Manifest, PartId};
use crate::metadata::MetadataAttacher;
use crate::normalize::Normalizer;
use crate::scene::{HostScene, ObjectId};

/// Lifecycle of one re-tessellation target.
#[derive(Debug, Clone, PartialEq)]
pub enum RetessState {
    /// No run requested.
    Idle,
    /// Queued at the given quality.
    Requested { quality: f64 },
    /// Engine run in flight.
    Converting,
    /// New geometry swapped in at the given quality.
    Applied { quality: f64 },
    /// Run failed; prior geometry retained.
    Failed { message: String },
}

/// Outcome of a subtree run. Per-target failures do not abort the rest.
#[derive(Debug, Default)]
pub struct SubtreeReport {
    /// Targets whose geometry was replaced.
    pub applied: Vec<PartId>,
    /// Targets that failed, with the surfaced error message.
    pub failed: Vec<(PartId, String)>,
}

/// Drives restricted engine runs against already-placed objects.
pub struct Retessellator<'a> {
    engine: Arc<dyn ConversionEngine>,
    manifest: &'a Manifest,
    source_file: &'a Path,
    normalizer: &'a Normalizer,
    placed: &'a BTreeMap<PartId, ObjectId>,
    states: BTreeMap<PartId, RetessState>,
}

impl<'a> Retessellator<'a> {
    /// Build a re-tessellator over one completed import run.
    pub fn new(
        engine: Arc<dyn ConversionEngine>,
        manifest: &'a Manifest,
        source_file: &'a Path,
        normalizer: &'a Normalizer,
        placed: &'a BTreeMap<PartId, ObjectId>,
    ) -> Self {
        Self {
            engine,
            manifest,
            source_file,
            normalizer,
            placed,
            states: BTreeMap::new(),
        }
    }

    /// Current state of a target.
    pub fn state(&self, target: &PartId) -> RetessState {
        self.states.get(target).cloned().unwrap_or(RetessState::Idle)
    }

    /// Re-tessellate one placed part at `quality`.
    ///
    /// Runs the engine restricted to the target's source part, swaps the
    /// geometry in place, and refreshes the engine-reported attributes. On
    /// any failure the object is left exactly as it was.
    pub async fn retessellate(
        &mut self,
        scene: &mut dyn HostScene,
        target: &PartId,
        quality: f64,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        self.states
            .insert(target.clone(), RetessState::Requested { quality });

        let result = self.run_one(scene, target, quality, cancel).await;
        match &result {
            Ok(()) => {
                info!(part = %target, quality, "Re-tessellation applied");
                self.states
                    .insert(target.clone(), RetessState::Applied { quality });
            }
            Err(e) => {
                warn!(part = %target, error = %e, "Re-tessellation failed");
                self.states.insert(
                    target.clone(),
                    RetessState::Failed {
                        message: e.to_string(),
                    },
                );
            }
        }
        result
    }

    /// Re-tessellate a part and every placed descendant, each as an
    /// independent run. Failures are collected per target; cancellation is
    /// honored between targets at `batch_size` boundaries.
    pub async fn retessellate_subtree(
        &mut self,
        scene: &mut dyn HostScene,
        root: &PartId,
        quality: f64,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<SubtreeReport, ImportError> {
        let targets = self.collect_subtree(root);
        let batch_size = batch_size.max(1);
        let mut report = SubtreeReport::default();

        for (done, target) in targets.iter().enumerate() {
            if done > 0 && done % batch_size == 0 {
                if cancel.is_cancelled() {
                    return Err(ImportError::Cancelled);
                }
                tokio::task::yield_now().await;
            }
            match self.retessellate(scene, target, quality, cancel).await {
                Ok(()) => report.applied.push(target.clone()),
                Err(ImportError::Cancelled) => return Err(ImportError::Cancelled),
                Err(e) => report.failed.push((target.clone(), e.to_string())),
            }
        }

        info!(
            root = %root,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Subtree re-tessellation complete"
        );
        Ok(report)
    }

    async fn run_one(
        &mut self,
        scene: &mut dyn HostScene,
        target: &PartId,
        quality: f64,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        let &object = self
            .placed
            .get(target)
            .ok_or_else(|| ImportError::malformed(format!("part '{target}' was never placed")))?;

        self.states.insert(target.clone(), RetessState::Converting);
        let request = ConversionRequest {
            input_path: self.source_file.to_path_buf(),
            quality,
            restrict_to: vec![target.clone()],
        };
        let artifacts = self.engine.convert(&request, cancel.clone()).await?;

        let fresh = Manifest::parse(&artifacts.manifest_path)?;
        let part = fresh.part(target).ok_or_else(|| {
            ImportError::malformed(format!("restricted run omitted part '{target}'"))
        })?;
        let geometry_file = part.geometry_file.as_ref().ok_or_else(|| {
            ImportError::malformed(format!("restricted run produced no geometry for '{target}'"))
        })?;

        let mut mesh = load_obj(&resolve(geometry_file, &artifacts.geometry_dir))
            .map_err(|reason| ImportError::malformed(reason.to_string()))?;
        self.normalizer.apply_to_mesh(&mut mesh);

        scene
            .set_geometry(object, Arc::new(mesh))
            .map_err(|reason| ImportError::malformed(reason.to_string()))?;

        // Refresh engine-reported values from the fresh manifest.
        let singleton = BTreeMap::from([(target.clone(), object)]);
        MetadataAttacher::new(&fresh, self.source_file, quality).attach(scene, &singleton, &[]);

        artifacts.cleanup().await;
        Ok(())
    }

    /// The root plus every placed descendant, in manifest tree order.
    fn collect_subtree(&self, root: &PartId) -> Vec<PartId> {
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            if let Some(part) = self.manifest.part(&id) {
                if self.placed.contains_key(&id) && part.geometry_file.is_some() {
                    out.push(id.clone());
                }
                for child in part.children.iter().rev() {
                    stack.push(child.clone());
                }
            }
        }
        out
    }
}

fn resolve(geometry_file: &Path, geometry_dir: &Path) -> PathBuf {
    if geometry_file.is_absolute() {
        geometry_file.to_path_buf()
    } else {
        geometry_dir.join(geometry_file)
    }
}
