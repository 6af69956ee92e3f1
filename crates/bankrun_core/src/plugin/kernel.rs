//! Plugin run orchestration.
//!
//! # Responsibility
//! - Own the current manifest snapshot and the process launcher.
//! - Drive one run: lookup, resolve, stage, launch, collect.
//!
//! # Invariants
//! - Steps run strictly in order; exactly one attempt, no retries.
//! - An unknown plugin name fails before any filesystem or process effect.
//! - No process is launched when the entry script is missing.
//! - Staged artifacts are left on disk when a later step fails.

use crate::config::{KernelConfig, PlatformFamily};
use crate::plugin::contract::{
    build_input_payload, resolve_stdin, write_text_file, AttemptId, ContractLayout, ContractPaths,
};
use crate::plugin::invoker::{launcher_for, Invocation, LaunchError, ProcessLauncher};
use crate::plugin::manifest::{ManifestSnapshot, PluginManifest, MANIFEST_FILE_NAME};
use crate::workspace::{Address, Resolver, RevisitGuard, Workspace};
use log::{error, info, warn};
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Input for one plugin run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub plugin: String,
    pub address: Address,
    /// Inline JSON text, a path to a JSON file, or empty.
    pub stdin: String,
}

impl RunRequest {
    pub fn new(plugin: impl Into<String>, address: Address) -> Self {
        Self {
            plugin: plugin.into(),
            address,
            stdin: String::new(),
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }
}

/// Successful run result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    /// Content of `output.json`, byte for byte.
    pub raw_output: Vec<u8>,
    /// `exit=<code>` followed by the non-empty stdout/stderr logs.
    pub report: String,
    pub contract: ContractPaths,
    pub attempt: Option<AttemptId>,
}

impl ExecutionOutcome {
    /// `raw_output` as text; invalid UTF-8 sequences are replaced.
    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_output)
    }
}

/// Plugin kernel bound to one configuration and launcher.
pub struct Kernel {
    config: KernelConfig,
    layout: ContractLayout,
    launcher: Box<dyn ProcessLauncher>,
    snapshot: ManifestSnapshot,
}

impl Kernel {
    /// Creates a kernel using the launcher for `config.platform` and runs an
    /// initial discovery pass.
    pub fn new(config: KernelConfig) -> Self {
        let launcher = launcher_for(config.platform);
        Self::with_launcher(config, launcher)
    }

    /// Creates a kernel with a caller-supplied launcher.
    ///
    /// Entry script selection follows `launcher.family()`.
    pub fn with_launcher(config: KernelConfig, launcher: Box<dyn ProcessLauncher>) -> Self {
        let snapshot = ManifestSnapshot::discover(&config.plugins_root);
        Self {
            layout: ContractLayout::new(config.clone()),
            config,
            launcher,
            snapshot,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn layout(&self) -> &ContractLayout {
        &self.layout
    }

    pub fn snapshot(&self) -> &ManifestSnapshot {
        &self.snapshot
    }

    /// Replaces the snapshot with a fresh discovery pass.
    pub fn refresh(&mut self) {
        self.snapshot = ManifestSnapshot::discover(&self.config.plugins_root);
        info!(
            "event=plugin_refresh module=kernel status=ok plugins={}",
            self.snapshot.len()
        );
    }

    /// Known plugins in lookup order.
    pub fn list(&self) -> &[PluginManifest] {
        self.snapshot.manifests()
    }

    pub fn find(&self, name: &str) -> Option<&PluginManifest> {
        self.snapshot.find(name)
    }

    /// Runs one plugin against the value at `request.address`.
    ///
    /// # Errors
    /// One `KernelError` variant per failed step; see `RunErrorKind`.
    pub fn run<S>(&self, store: &S, request: &RunRequest) -> Result<ExecutionOutcome, KernelError>
    where
        S: Workspace + Resolver + ?Sized,
    {
        let started_at = Instant::now();
        let result = self.run_steps(store, request);
        match &result {
            Ok(outcome) => info!(
                "event=plugin_run module=kernel status=ok plugin={} exit={} duration_ms={}",
                request.plugin,
                outcome.exit_code,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=plugin_run module=kernel status=error plugin={} error_code={} duration_ms={}",
                request.plugin,
                err.kind().as_str(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn run_steps<S>(&self, store: &S, request: &RunRequest) -> Result<ExecutionOutcome, KernelError>
    where
        S: Workspace + Resolver + ?Sized,
    {
        let address = request.address;
        let manifest =
            self.snapshot
                .find(&request.plugin)
                .ok_or_else(|| KernelError::PluginNotFound {
                    name: request.plugin.clone(),
                })?;

        // A failed load is only recorded; the fetch below reports the effect.
        let bank_note = match store.ensure_bank_loaded(address.bank) {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    "event=bank_load module=kernel status=error bank={} error={}",
                    address.bank, err
                );
                Some(err.to_string())
            }
        };

        let raw = store
            .fetch_raw(address)
            .ok_or_else(|| KernelError::NoValueAtAddress {
                address,
                bank_note: bank_note.clone(),
            })?;

        let mut guard = RevisitGuard::new();
        guard.insert(address);
        let code = store.resolve_references(&raw, address.bank, &mut guard);

        let attempt = self.config.attempt_isolation.then(AttemptId::generate);
        let contract = self
            .layout
            .stage(address, &manifest.name, attempt.as_ref())
            .map_err(|err| KernelError::StageWriteFailure {
                path: self
                    .layout
                    .paths_for(address, &manifest.name, attempt.as_ref())
                    .directory,
                source: err,
            })?;

        write_text_file(&contract.code_file, &code).map_err(|err| {
            KernelError::StageWriteFailure {
                path: contract.code_file.clone(),
                source: err,
            }
        })?;

        let title = store.bank_title(address.bank).unwrap_or_default();
        let payload = build_input_payload(
            &self.layout.encode(address),
            &title,
            &contract.code_file,
            &resolve_stdin(&request.stdin),
        );
        write_text_file(&contract.input_file, &payload).map_err(|err| {
            KernelError::StageWriteFailure {
                path: contract.input_file.clone(),
                source: err,
            }
        })?;

        let family = self.launcher.family();
        let entry = entry_path(manifest, family).ok_or_else(|| KernelError::EntryNotDeclared {
            field: entry_field(family),
            manifest_file: manifest.directory.join(MANIFEST_FILE_NAME),
        })?;
        if !entry.is_file() {
            return Err(KernelError::EntryScriptMissing { entry });
        }

        let invocation = Invocation {
            entry,
            input_file: contract.input_file.clone(),
            output_dir: contract.directory.clone(),
            log_file: contract.log_file.clone(),
            err_file: contract.err_file.clone(),
        };
        let exit_code = self
            .launcher
            .execute(&invocation)
            .map_err(KernelError::LaunchFailure)?;

        let stdout = read_log(&contract.log_file);
        let stderr = read_log(&contract.err_file);
        let raw_output = match std::fs::read(&contract.output_file) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(KernelError::PluginOutputMissing {
                    output_file: contract.output_file.clone(),
                    exit_code,
                    stdout,
                    stderr,
                    source: err,
                });
            }
        };

        Ok(ExecutionOutcome {
            exit_code,
            raw_output,
            report: compose_report(exit_code, &stdout, &stderr),
            contract,
            attempt,
        })
    }
}

/// Entry script path for `family`, or `None` when the manifest leaves it empty.
pub fn entry_path(manifest: &PluginManifest, family: PlatformFamily) -> Option<PathBuf> {
    let name = match family {
        PlatformFamily::Windows => manifest.entry_windows.trim(),
        PlatformFamily::Posix => manifest.entry_posix.trim(),
    };
    if name.is_empty() {
        return None;
    }
    Some(manifest.directory.join(name))
}

/// Manifest field holding the entry script name for `family`.
pub fn entry_field(family: PlatformFamily) -> &'static str {
    match family {
        PlatformFamily::Windows => "entry_win",
        PlatformFamily::Posix => "entry_lin",
    }
}

fn read_log(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn compose_report(exit_code: i32, stdout: &str, stderr: &str) -> String {
    let mut report = format!("exit={exit_code}\n");
    push_section(&mut report, "log", stdout);
    push_section(&mut report, "stderr", stderr);
    report
}

fn push_section(report: &mut String, label: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    report.push_str(label);
    report.push_str(":\n");
    report.push_str(text);
    report.push('\n');
}

/// Stable classification of run failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    PluginNotFound,
    NoValueAtAddress,
    StageWriteFailure,
    EntryScriptMissing,
    LaunchFailure,
    PluginOutputMissing,
}

impl RunErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PluginNotFound => "plugin_not_found",
            Self::NoValueAtAddress => "no_value_at_address",
            Self::StageWriteFailure => "stage_write_failure",
            Self::EntryScriptMissing => "entry_script_missing",
            Self::LaunchFailure => "launch_failure",
            Self::PluginOutputMissing => "plugin_output_missing",
        }
    }
}

/// Failure of one `Kernel::run` step. `Display` renders the diagnostic report.
#[derive(Debug)]
pub enum KernelError {
    PluginNotFound {
        name: String,
    },
    NoValueAtAddress {
        address: Address,
        /// Recorded failure from the bank load step, if any.
        bank_note: Option<String>,
    },
    StageWriteFailure {
        path: PathBuf,
        source: io::Error,
    },
    EntryScriptMissing {
        entry: PathBuf,
    },
    /// The manifest leaves the entry field for the active platform empty.
    EntryNotDeclared {
        field: &'static str,
        manifest_file: PathBuf,
    },
    LaunchFailure(LaunchError),
    PluginOutputMissing {
        output_file: PathBuf,
        exit_code: i32,
        stdout: String,
        stderr: String,
        source: io::Error,
    },
}

impl KernelError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::PluginNotFound { .. } => RunErrorKind::PluginNotFound,
            Self::NoValueAtAddress { .. } => RunErrorKind::NoValueAtAddress,
            Self::StageWriteFailure { .. } => RunErrorKind::StageWriteFailure,
            Self::EntryScriptMissing { .. } | Self::EntryNotDeclared { .. } => {
                RunErrorKind::EntryScriptMissing
            }
            Self::LaunchFailure(_) => RunErrorKind::LaunchFailure,
            Self::PluginOutputMissing { .. } => RunErrorKind::PluginOutputMissing,
        }
    }

    /// Human-readable report text.
    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PluginNotFound { name } => write!(f, "plugin not found: {name}"),
            Self::NoValueAtAddress { address, bank_note } => {
                write!(f, "no value at {address}")?;
                if let Some(note) = bank_note {
                    write!(f, "\nbank load failed: {note}")?;
                }
                Ok(())
            }
            Self::StageWriteFailure { path, source } => {
                write!(f, "cannot write {}: {source}", path.display())
            }
            Self::EntryScriptMissing { entry } => {
                write!(f, "entry not found: {}", entry.display())
            }
            Self::EntryNotDeclared {
                field,
                manifest_file,
            } => write!(
                f,
                "entry not found: `{field}` is empty in {}",
                manifest_file.display()
            ),
            Self::LaunchFailure(err) => write!(f, "plugin launch failed: {err}"),
            Self::PluginOutputMissing {
                output_file,
                exit_code,
                stdout,
                stderr,
                source,
            } => {
                let file_name = output_file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if source.kind() == io::ErrorKind::NotFound {
                    write!(f, "plugin did not produce {file_name}. ")?;
                } else {
                    write!(f, "plugin did not produce a readable {file_name} ({source}). ")?;
                }
                f.write_str(&compose_report(*exit_code, stdout, stderr))
            }
        }
    }
}

impl Error for KernelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StageWriteFailure { source, .. } => Some(source),
            Self::LaunchFailure(err) => Some(err),
            Self::PluginOutputMissing { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Flat `(success, payload, report)` view of a run result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub success: bool,
    /// Raw `output.json` bytes on success.
    pub payload: Option<Vec<u8>>,
    pub report: String,
}

impl From<Result<ExecutionOutcome, KernelError>> for RunReport {
    fn from(value: Result<ExecutionOutcome, KernelError>) -> Self {
        match value {
            Ok(outcome) => Self {
                success: true,
                payload: Some(outcome.raw_output),
                report: outcome.report,
            },
            Err(err) => Self {
                success: false,
                payload: None,
                report: err.report(),
            },
        }
    }
}
