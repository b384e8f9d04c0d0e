//! Conversion bridge: external engine subprocess lifecycle.
//!
//! Owns exactly one engine process per conversion call: builds the input
//! script, launches the process with a wall-clock timeout and
//! platform-appropriate flags, captures exit status and output, and hands
//! back a results directory. The bridge never parses the manifest it
//! produced; that is the parser's job.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ImportError;
use crate::manifest::PartId;
use crate::models::FileType;
use crate::scripting::{MANIFEST_FILENAME, ScriptRequest, ScriptingEngine};

/// One conversion call: input file, quality, optional part restriction.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// CAD input file; extension must be on the allow-list.
    pub input_path: PathBuf,
    /// Tessellation quality (lower = finer).
    pub quality: f64,
    /// Restrict the run to these part identities; empty = whole assembly.
    pub restrict_to: Vec<PartId>,
}

impl ConversionRequest {
    /// Whole-assembly conversion at the given quality.
    pub fn full(input_path: impl Into<PathBuf>, quality: f64) -> Self {
        Self {
            input_path: input_path.into(),
            quality,
            restrict_to: Vec::new(),
        }
    }
}

/// Output handle from a successful conversion.
///
/// The job directory is exclusively owned by the conversion that produced
/// it. Call [`ConversionArtifacts::cleanup`] once the pipeline has consumed
/// the output; on failure the directory is retained for inspection.
#[derive(Debug)]
pub struct ConversionArtifacts {
    /// Path to the manifest file.
    pub manifest_path: PathBuf,
    /// Directory containing one geometry file per part.
    pub geometry_dir: PathBuf,
    /// The job directory both of the above live in.
    pub job_dir: PathBuf,
}

impl ConversionArtifacts {
    /// Remove the job directory after successful consumption.
    pub async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.job_dir).await {
            warn!(
                job_dir = %self.job_dir.display(),
                error = %e,
                "Failed to remove job directory"
            );
        }
    }
}

/// Completion event from a detached conversion, tagged so the foreground
/// driver can associate it with the request that started it.
#[derive(Debug)]
pub struct TaggedConversion {
    /// Tag returned by [`ConversionEngine::convert_detached`].
    pub tag: Uuid,
    /// The conversion outcome.
    pub result: Result<ConversionArtifacts, ImportError>,
}

/// Handle to an in-flight detached conversion.
#[derive(Debug)]
pub struct ConversionTask {
    /// Tag identifying this conversion.
    pub tag: Uuid,
    /// Delivers the tagged completion event exactly once.
    pub completion: oneshot::Receiver<TaggedConversion>,
}

/// Seam between the pipeline and the external conversion engine.
///
/// The production implementation is [`FreeCadEngine`]; tests drive the
/// pipeline with fakes.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Run one conversion to completion. Blocks the calling worker task
    /// until the engine finishes, fails, or times out; never call this
    /// from the host's foreground thread.
    async fn convert(
        &self,
        request: &ConversionRequest,
        cancel: CancellationToken,
    ) -> Result<ConversionArtifacts, ImportError>;
}

/// FreeCAD command-line conversion engine.
#[derive(Debug, Clone)]
pub struct FreeCadEngine {
    config: EngineConfig,
}

impl FreeCadEngine {
    /// Create an engine from explicit configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Probe the engine executable with `--version` and a short timeout.
    pub async fn validate(&self) -> Result<String, ImportError> {
        self.config.ensure_engine_available()?;

        let output = tokio::time::timeout(
            Duration::from_secs(10),
            tokio::process::Command::new(&self.config.engine_path)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ImportError::ConversionTimeout {
            elapsed_secs: 10,
            timeout_secs: 10,
        })??;

        if !output.status.success() {
            return Err(ImportError::ConversionFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Start a conversion detached from the caller, returning immediately.
    ///
    /// The returned task carries a tag and a oneshot receiver that later
    /// delivers the tagged completion event; the foreground driver polls
    /// or awaits it without ever blocking on the engine process.
    pub fn convert_detached(
        self: &Arc<Self>,
        request: ConversionRequest,
        cancel: CancellationToken,
    ) -> ConversionTask {
        let tag = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let result = engine.convert(&request, cancel).await;
            // Receiver dropped means nobody is waiting; nothing to do.
            let _ = tx.send(TaggedConversion { tag, result });
        });

        ConversionTask {
            tag,
            completion: rx,
        }
    }

    /// Run the engine process against a generated script.
    async fn execute_engine(
        &self,
        script_path: &Path,
        cancel: CancellationToken,
    ) -> Result<(), ImportError> {
        let script_str = script_path
            .to_str()
            .ok_or_else(|| ImportError::InvalidUtf8Path {
                path: script_path.to_path_buf(),
            })?;

        let mut cmd = tokio::process::Command::new(&self.config.engine_path);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let (stdout_cfg, stderr_cfg) = if self.config.capture_output {
            (Stdio::piped(), Stdio::piped())
        } else {
            (Stdio::null(), Stdio::null())
        };

        cmd.args(["-c", script_str])
            .stdin(Stdio::null())
            .stdout(stdout_cfg)
            .stderr(stderr_cfg)
            .kill_on_drop(true);

        debug!(
            engine = %self.config.engine_path.display(),
            script = %script_path.display(),
            timeout_s = self.config.timeout_seconds,
            "Spawning conversion engine"
        );

        let start = Instant::now();
        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        tokio::select! {
            result = child.wait() => {
                let status = result?;
                let elapsed = start.elapsed();

                let stderr_str = read_pipe(stderr).await;
                if !stderr_str.is_empty() {
                    debug!(stderr = %stderr_str, "Engine stderr output");
                }
                // Drain stdout so the child is fully reaped.
                let _ = read_pipe(stdout).await;

                if status.success() {
                    info!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Engine conversion completed"
                    );
                    Ok(())
                } else {
                    let code = status.code().unwrap_or(-1);
                    error!(
                        code = code,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Engine conversion failed"
                    );
                    Err(ImportError::ConversionFailed {
                        code,
                        stderr: stderr_str.chars().take(2000).collect(),
                    })
                }
            }
            _ = tokio::time::sleep(timeout) => {
                error!(
                    timeout_s = self.config.timeout_seconds,
                    "Engine process timed out, killing"
                );
                let _ = child.kill().await;
                Err(ImportError::ConversionTimeout {
                    elapsed_secs: start.elapsed().as_secs(),
                    timeout_secs: self.config.timeout_seconds,
                })
            }
            _ = cancel.cancelled() => {
                info!("Conversion cancelled, killing engine process");
                let _ = child.kill().await;
                Err(ImportError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl ConversionEngine for FreeCadEngine {
    async fn convert(
        &self,
        request: &ConversionRequest,
        cancel: CancellationToken,
    ) -> Result<ConversionArtifacts, ImportError> {
        FileType::try_from_path(&request.input_path)?;
        self.config.ensure_engine_available()?;

        if !request.input_path.exists() {
            return Err(ImportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input file not found: {}", request.input_path.display()),
            )));
        }

        let job_dir = self
            .config
            .effective_temp_root()
            .join(format!("job__{}", Uuid::now_v7().simple()));
        tokio::fs::create_dir_all(&job_dir).await?;

        let script_request = ScriptRequest {
            input_path: request.input_path.clone(),
            output_dir: job_dir.clone(),
            quality: request.quality,
            restrict_to: request.restrict_to.clone(),
        };
        let script_path = ScriptingEngine::generate(&script_request, &job_dir).await?;

        info!(
            input = %request.input_path.display(),
            job_dir = %job_dir.display(),
            quality = request.quality,
            restricted = !request.restrict_to.is_empty(),
            "Starting conversion"
        );

        let exec_result = self.execute_engine(&script_path, cancel).await;

        if !self.config.keep_debug_scripts {
            let _ = tokio::fs::remove_file(&script_path).await;
        }

        // On failure the job directory is retained for inspection.
        exec_result?;

        let manifest_path = job_dir.join(MANIFEST_FILENAME);
        if !manifest_path.exists() {
            return Err(ImportError::ManifestMissing {
                path: manifest_path,
            });
        }

        Ok(ConversionArtifacts {
            manifest_path,
            geometry_dir: job_dir.clone(),
            job_dir,
        })
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    match pipe {
        Some(mut r) => {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_path(path: impl Into<PathBuf>, temp_root: PathBuf) -> FreeCadEngine {
        FreeCadEngine::new(EngineConfig {
            engine_path: path.into(),
            temp_root: Some(temp_root),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_unsupported_extension_rejected_before_spawn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_path("/nonexistent/engine", temp.path().to_path_buf());
        let request = ConversionRequest::full("/data/model.fbx", 0.1);

        let err = engine
            .convert(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_engine_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = FreeCadEngine::new(EngineConfig {
            temp_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        });
        let request = ConversionRequest::full("/data/model.step", 0.1);

        let err = engine
            .convert(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::EngineNotConfigured { .. }));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable fake engine script.
        fn fake_engine(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake_engine.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write");
            let mut perms = std::fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        fn step_input(dir: &Path) -> PathBuf {
            let input = dir.join("part.step");
            std::fs::write(&input, "ISO-10303-21;").expect("write");
            input
        }

        #[tokio::test]
        async fn test_nonzero_exit_captures_stderr() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exe = fake_engine(temp.path(), "echo 'kernel panic' >&2; exit 3");
            let engine = engine_with_path(&exe, temp.path().join("jobs"));
            let request = ConversionRequest::full(step_input(temp.path()), 0.1);

            let err = engine
                .convert(&request, CancellationToken::new())
                .await
                .unwrap_err();
            match err {
                ImportError::ConversionFailed { code, stderr } => {
                    assert_eq!(code, 3);
                    assert!(stderr.contains("kernel panic"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exe = fake_engine(temp.path(), "sleep 30");
            let config = EngineConfig {
                engine_path: exe,
                temp_root: Some(temp.path().join("jobs")),
                timeout_seconds: 1,
                ..Default::default()
            };
            let engine = FreeCadEngine::new(config);
            let request = ConversionRequest::full(step_input(temp.path()), 0.1);

            let err = engine
                .convert(&request, CancellationToken::new())
                .await
                .unwrap_err();
            match err {
                ImportError::ConversionTimeout {
                    elapsed_secs,
                    timeout_secs,
                } => {
                    assert_eq!(timeout_secs, 1);
                    assert!(elapsed_secs >= 1);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_success_without_manifest_is_error() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exe = fake_engine(temp.path(), "exit 0");
            let engine = engine_with_path(&exe, temp.path().join("jobs"));
            let request = ConversionRequest::full(step_input(temp.path()), 0.1);

            let err = engine
                .convert(&request, CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ImportError::ManifestMissing { .. }));
        }

        #[tokio::test]
        async fn test_detached_delivers_tagged_completion() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exe = fake_engine(temp.path(), "echo 'boom' >&2; exit 1");
            let engine = Arc::new(engine_with_path(&exe, temp.path().join("jobs")));
            let request = ConversionRequest::full(step_input(temp.path()), 0.1);

            let task = engine.convert_detached(request, CancellationToken::new());
            let tag = task.tag;
            let event = task.completion.await.expect("completion delivered");
            assert_eq!(event.tag, tag);
            assert!(matches!(
                event.result,
                Err(ImportError::ConversionFailed { .. })
            ));
        }

        #[tokio::test]
        async fn test_cancellation_kills_process() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exe = fake_engine(temp.path(), "sleep 30");
            let engine = Arc::new(engine_with_path(&exe, temp.path().join("jobs")));
            let request = ConversionRequest::full(step_input(temp.path()), 0.1);

            let cancel = CancellationToken::new();
            let task = engine.convert_detached(request, cancel.clone());
            cancel.cancel();

            let event = task.completion.await.expect("completion delivered");
            assert!(matches!(event.result, Err(ImportError::Cancelled)));
        }
    }
}
