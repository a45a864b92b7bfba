// src/finalizer/mod.rs

//! Finalizer execution for package install/uninstall hooks
//!
//! Packages declare shell hooks through annotations; the installer runs
//! them strictly in dependency order once artifacts are unpacked (or
//! before records are dropped on uninstall). Execution goes through the
//! `Sandbox` trait: the direct implementation runs hooks in-process with
//! a timeout guard and a nulled stdin, while namespace isolation for
//! alternate roots stays behind the same seam.

use crate::error::{Error, Result};
use crate::pkg::Package;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Default timeout for hook execution (60 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Annotation keys carrying hook scripts
pub const INSTALL_HOOK_ANNOTATION: &str = "hooks.install";
pub const UNINSTALL_HOOK_ANNOTATION: &str = "hooks.uninstall";

/// Which hook to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Install,
    Uninstall,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }

    fn annotation_key(&self) -> &'static str {
        match self {
            Self::Install => INSTALL_HOOK_ANNOTATION,
            Self::Uninstall => UNINSTALL_HOOK_ANNOTATION,
        }
    }
}

/// Outcome of a sandboxed hook run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Exited(i32),
    TimedOut,
}

/// Executes one script against a target root
///
/// The direct implementation below runs the script in-process. An
/// isolated implementation (mount/PID/user namespaces for alternate
/// roots) plugs in through the same trait.
pub trait Sandbox: Send + Sync {
    fn run(&self, script: &Path, env: &[(String, String)], root: &Path) -> Result<SandboxStatus>;
}

/// In-process execution with timeout and stdin nullification
pub struct DirectSandbox {
    timeout: Duration,
}

impl DirectSandbox {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for DirectSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox for DirectSandbox {
    fn run(&self, script: &Path, env: &[(String, String)], root: &Path) -> Result<SandboxStatus> {
        debug!("Executing hook script {}", script.display());

        let mut child = Command::new("/bin/sh")
            .arg(script)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(root)
            .stdin(Stdio::null()) // Prevent stdin hangs
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                for line in stdout.lines() {
                    info!("[hook] {}", line);
                }
                for line in stderr.lines() {
                    warn!("[hook] {}", line);
                }

                Ok(SandboxStatus::Exited(status.code().unwrap_or(-1)))
            }
            None => {
                let _ = child.kill();
                Ok(SandboxStatus::TimedOut)
            }
        }
    }
}

/// Runs package hooks against a target root in dependency order
pub struct FinalizerRunner {
    root: PathBuf,
    sandbox: Box<dyn Sandbox>,
}

impl FinalizerRunner {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sandbox: Box::new(DirectSandbox::new()),
        }
    }

    pub fn with_sandbox(mut self, sandbox: Box<dyn Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Run one phase's hook for a package. Packages without a hook for
    /// the phase are a no-op.
    pub fn run(&self, package: &Package, phase: HookPhase) -> Result<()> {
        let Some(body) = package.annotations.get(phase.annotation_key()) else {
            return Ok(());
        };

        info!("Running {} finalizer for {}", phase.as_str(), package);

        let scratch = TempDir::new()?;
        let script_path = scratch.path().join("hook.sh");
        let mut file = File::create(&script_path)?;
        file.write_all(body.as_bytes())?;
        drop(file);
        set_executable(&script_path)?;

        let env = vec![
            ("STRATA_PACKAGE_NAME".to_string(), package.name.clone()),
            (
                "STRATA_PACKAGE_CATEGORY".to_string(),
                package.category.clone(),
            ),
            (
                "STRATA_PACKAGE_VERSION".to_string(),
                package.version.to_string(),
            ),
            (
                "STRATA_ROOT".to_string(),
                self.root.to_string_lossy().into_owned(),
            ),
            ("STRATA_PHASE".to_string(), phase.as_str().to_string()),
        ];

        match self.sandbox.run(&script_path, &env, &self.root)? {
            SandboxStatus::Exited(0) => Ok(()),
            SandboxStatus::Exited(code) => Err(Error::Finalizer {
                package: package.to_string(),
                reason: format!("{} hook exited with code {}", phase.as_str(), code),
            }),
            SandboxStatus::TimedOut => Err(Error::Finalizer {
                package: package.to_string(),
                reason: format!("{} hook timed out", phase.as_str()),
            }),
        }
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn package_with_hook(phase: HookPhase, body: &str) -> Package {
        let mut pkg = Package::new("app", "tool", "1.0.0").unwrap();
        pkg.set_annotation(phase.annotation_key(), body);
        pkg
    }

    #[test]
    fn test_missing_hook_is_noop() {
        let root = tempdir().unwrap();
        let runner = FinalizerRunner::new(root.path());
        let pkg = Package::new("app", "tool", "1.0.0").unwrap();

        assert!(runner.run(&pkg, HookPhase::Install).is_ok());
    }

    #[test]
    fn test_hook_runs_with_environment() {
        let root = tempdir().unwrap();
        let runner = FinalizerRunner::new(root.path());
        let pkg = package_with_hook(
            HookPhase::Install,
            "printf '%s %s %s' \"$STRATA_PACKAGE_NAME\" \"$STRATA_PACKAGE_VERSION\" \"$STRATA_PHASE\" > \"$STRATA_ROOT/hook-ran\"\n",
        );

        runner.run(&pkg, HookPhase::Install).unwrap();

        let recorded = fs::read_to_string(root.path().join("hook-ran")).unwrap();
        assert_eq!(recorded, "tool 1.0.0 install");
    }

    #[test]
    fn test_hook_runs_in_root_directory() {
        let root = tempdir().unwrap();
        let runner = FinalizerRunner::new(root.path());
        let pkg = package_with_hook(HookPhase::Uninstall, "touch cwd-marker\n");

        runner.run(&pkg, HookPhase::Uninstall).unwrap();
        assert!(root.path().join("cwd-marker").exists());
    }

    #[test]
    fn test_failing_hook_surfaces_exit_code() {
        let root = tempdir().unwrap();
        let runner = FinalizerRunner::new(root.path());
        let pkg = package_with_hook(HookPhase::Install, "exit 3\n");

        let err = runner.run(&pkg, HookPhase::Install).unwrap_err();
        match err {
            Error::Finalizer { package, reason } => {
                assert!(package.contains("app/tool"));
                assert!(reason.contains("code 3"));
            }
            other => panic!("expected Finalizer error, got {:?}", other),
        }
    }

    #[test]
    fn test_hanging_hook_times_out() {
        let root = tempdir().unwrap();
        let runner = FinalizerRunner::new(root.path()).with_sandbox(Box::new(
            DirectSandbox::new().with_timeout(Duration::from_millis(200)),
        ));
        let pkg = package_with_hook(HookPhase::Install, "sleep 30\n");

        let err = runner.run(&pkg, HookPhase::Install).unwrap_err();
        assert!(matches!(err, Error::Finalizer { .. }));
    }

    #[test]
    fn test_uninstall_hook_only_runs_for_its_phase() {
        let root = tempdir().unwrap();
        let runner = FinalizerRunner::new(root.path());
        let pkg = package_with_hook(HookPhase::Uninstall, "touch removed-marker\n");

        // Install phase has no hook on this package
        runner.run(&pkg, HookPhase::Install).unwrap();
        assert!(!root.path().join("removed-marker").exists());

        runner.run(&pkg, HookPhase::Uninstall).unwrap();
        assert!(root.path().join("removed-marker").exists());
    }
}
