//! Invokes the host `docker` binary to run a synthesized recipe — the
//! Build Driver (spec §4.6).
//!
//! Grounded on `docker.rs`'s `CliDocker`/`Command::new(docker_path)`
//! subprocess pattern and `build/mod.rs`'s `BuildOptions::to_docker_args()`
//! argument-ordering discipline.

use crate::build::BuildOptions;
use crate::errors::EngineError;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use super::recipe::BackendMode;

/// One `--build-context name=dir` pair, or, in legacy mode, the path to a
/// pre-built content image this build depends on.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DriveRequest {
    pub recipe_path: PathBuf,
    pub context_dir: PathBuf,
    pub image_tags: Vec<String>,
    pub build_args: Vec<(String, String)>,
    pub build_contexts: Vec<BuildContext>,
    pub options: BuildOptions,
}

/// Selects how a recipe is executed against the host Docker daemon.
pub trait BuildBackend {
    /// Whether this backend can pass `--build-context` (advanced/buildx only).
    fn supports_build_context(&self) -> bool;

    fn build(&self, request: &DriveRequest, docker_path: &str) -> Result<(), EngineError>;
}

/// `docker buildx build --load`, supporting injected build contexts.
#[derive(Debug, Default)]
pub struct AdvancedBackend;

impl BuildBackend for AdvancedBackend {
    fn supports_build_context(&self) -> bool {
        true
    }

    #[instrument(skip(self, request))]
    fn build(&self, request: &DriveRequest, docker_path: &str) -> Result<(), EngineError> {
        let mut command = Command::new(docker_path);
        command.args(["buildx", "build", "--load"]);
        command.arg("-f").arg(&request.recipe_path);

        for tag in &request.image_tags {
            command.arg("-t").arg(tag);
        }
        for ctx in &request.build_contexts {
            command
                .arg("--build-context")
                .arg(format!("{}={}", ctx.name, ctx.dir.display()));
        }
        for (key, value) in &request.build_args {
            command.arg("--build-arg").arg(format!("{key}={value}"));
        }
        for arg in request.options.to_docker_args() {
            command.arg(arg);
        }
        command.arg(&request.context_dir);

        run(command)
    }
}

/// Plain `docker build`, no BuildKit build-context support. When the
/// recipe needs a feature content image, it must already have been built
/// with [`build_content_image`] and embedded via a `FROM <image>` in the
/// recipe text itself.
#[derive(Debug, Default)]
pub struct LegacyBackend;

impl BuildBackend for LegacyBackend {
    fn supports_build_context(&self) -> bool {
        false
    }

    #[instrument(skip(self, request))]
    fn build(&self, request: &DriveRequest, docker_path: &str) -> Result<(), EngineError> {
        let mut command = Command::new(docker_path);
        command.arg("build");
        command.arg("-f").arg(&request.recipe_path);

        for tag in &request.image_tags {
            command.arg("-t").arg(tag);
        }
        for (key, value) in &request.build_args {
            command.arg("--build-arg").arg(format!("{key}={value}"));
        }
        for arg in request.options.to_docker_args() {
            command.arg(arg);
        }
        command.arg(&request.context_dir);

        run(command)
    }
}

pub fn backend_for(mode: BackendMode) -> Box<dyn BuildBackend> {
    match mode {
        BackendMode::Advanced => Box::new(AdvancedBackend),
        BackendMode::Legacy => Box::new(LegacyBackend),
    }
}

/// Builds the legacy-mode content image (`FROM scratch; COPY . /tmp/build-features/`)
/// from an empty Dockerfile written alongside the real recipe. The image name
/// gets a per-build suffix (DESIGN.md Open Question decision #2) so repeated
/// `devfeat build` invocations on the same host never collide on a stale tag.
#[instrument]
pub fn build_content_image(
    docker_path: &str,
    content_dockerfile: &Path,
    context_dir: &Path,
) -> Result<String, EngineError> {
    let suffix = content_image_suffix();
    let tag = format!("devfeat-feature-content:{suffix}");

    let mut command = Command::new(docker_path);
    command.arg("build");
    command.arg("-f").arg(content_dockerfile);
    command.arg("-t").arg(&tag);
    command.arg(context_dir);

    run(command)?;
    Ok(tag)
}

fn content_image_suffix() -> String {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{pid:x}{:x}", nanos as u64)
}

fn run(mut command: Command) -> Result<(), EngineError> {
    let interactive = std::io::stdin().is_terminal();
    debug!(?command, interactive, "invoking builder");

    if interactive {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let status = command.status()?;
        if !status.success() {
            return Err(EngineError::Build {
                exit_code: status.code(),
                stderr: "see terminal output above".to_string(),
            });
        }
        Ok(())
    } else {
        let output = command.stderr(Stdio::piped()).output()?;
        if !output.status.success() {
            return Err(EngineError::Build {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}
