//! Platform-specific child process launch for plugin entry scripts.
//!
//! # Responsibility
//! - Build the command line for one platform family.
//! - Run it to completion with stdout/stderr redirected into contract files.
//!
//! # Invariants
//! - The entry script receives exactly two positional arguments: the input
//!   payload path and the contract directory.
//! - Execution is blocking; no timeout or resource limit is applied.

use crate::config::PlatformFamily;
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

const POSIX_SHELL: &str = "/bin/sh";

/// Exit code reported when the child ended without one (killed by a signal).
pub const NO_EXIT_CODE: i32 = -1;

/// Everything a launcher needs for one plugin process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub entry: PathBuf,
    pub input_file: PathBuf,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    pub err_file: PathBuf,
}

/// Capability that runs one plugin process to completion.
pub trait ProcessLauncher {
    fn family(&self) -> PlatformFamily;

    /// Runs the entry script and returns its exit code.
    fn execute(&self, invocation: &Invocation) -> Result<i32, LaunchError>;
}

/// `/bin/sh -c` launcher with single-quote escaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixLauncher;

impl PosixLauncher {
    /// Shell script passed to `sh -c`.
    pub fn script(invocation: &Invocation) -> String {
        format!(
            "{} {} {}",
            shell_quote(&invocation.entry.to_string_lossy()),
            shell_quote(&invocation.input_file.to_string_lossy()),
            shell_quote(&invocation.output_dir.to_string_lossy())
        )
    }

    pub fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(POSIX_SHELL);
        cmd.arg("-c").arg(Self::script(invocation));
        cmd
    }
}

impl ProcessLauncher for PosixLauncher {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Posix
    }

    fn execute(&self, invocation: &Invocation) -> Result<i32, LaunchError> {
        run_redirected(Self::command(invocation), invocation)
    }
}

/// Launches the entry script directly, without an outer `cmd /C`.
///
/// For `.bat`/`.cmd` entries the standard library starts `cmd.exe` itself and
/// escapes every argument for it, so spaces and `&`, `^`, `%` in paths stay
/// inside one argument. Arguments it cannot pass safely make the spawn fail
/// instead of being split.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsLauncher;

impl WindowsLauncher {
    pub fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.entry);
        cmd.arg(&invocation.input_file).arg(&invocation.output_dir);
        cmd
    }
}

impl ProcessLauncher for WindowsLauncher {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Windows
    }

    fn execute(&self, invocation: &Invocation) -> Result<i32, LaunchError> {
        run_redirected(Self::command(invocation), invocation)
    }
}

/// Default launcher for `family`.
pub fn launcher_for(family: PlatformFamily) -> Box<dyn ProcessLauncher> {
    match family {
        PlatformFamily::Windows => Box::new(WindowsLauncher),
        PlatformFamily::Posix => Box::new(PosixLauncher),
    }
}

/// Quotes `value` for a POSIX shell word.
///
/// Wraps in single quotes; embedded single quotes become `'\''`.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn run_redirected(mut cmd: Command, invocation: &Invocation) -> Result<i32, LaunchError> {
    let stdout = create_redirect(&invocation.log_file)?;
    let stderr = create_redirect(&invocation.err_file)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    let started_at = Instant::now();
    debug!(
        "event=plugin_spawn module=invoker status=start entry={}",
        invocation.entry.display()
    );
    let status = cmd.status().map_err(|err| LaunchError::Spawn {
        program: format!("{cmd:?}"),
        source: err,
    })?;
    let code = status.code().unwrap_or(NO_EXIT_CODE);
    info!(
        "event=plugin_spawn module=invoker status=ok entry={} exit={} duration_ms={}",
        invocation.entry.display(),
        code,
        started_at.elapsed().as_millis()
    );
    Ok(code)
}

fn create_redirect(path: &Path) -> Result<File, LaunchError> {
    File::create(path).map_err(|err| LaunchError::Redirect {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Failures that prevent a child process from running at all.
#[derive(Debug)]
pub enum LaunchError {
    Redirect { path: PathBuf, source: io::Error },
    Spawn { program: String, source: io::Error },
}

impl Display for LaunchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redirect { path, source } => {
                write!(f, "cannot open `{}` for output: {source}", path.display())
            }
            Self::Spawn { program, source } => write!(f, "cannot start {program}: {source}"),
        }
    }
}

impl Error for LaunchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Redirect { source, .. } | Self::Spawn { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        launcher_for, shell_quote, Invocation, PosixLauncher, ProcessLauncher, WindowsLauncher,
    };
    use crate::config::PlatformFamily;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn invocation() -> Invocation {
        Invocation {
            entry: PathBuf::from("/opt/my plugins/run.sh"),
            input_file: PathBuf::from("/tmp/out dir/input.json"),
            output_dir: PathBuf::from("/tmp/out dir"),
            log_file: PathBuf::from("/tmp/out dir/run.log"),
            err_file: PathBuf::from("/tmp/out dir/run.err"),
        }
    }

    #[test]
    fn quotes_spaces_and_metacharacters() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("$(rm -rf x)"), "'$(rm -rf x)'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn posix_script_passes_two_positional_arguments() {
        let script = PosixLauncher::script(&invocation());
        assert_eq!(
            script,
            "'/opt/my plugins/run.sh' '/tmp/out dir/input.json' '/tmp/out dir'"
        );

        let cmd = PosixLauncher::command(&invocation());
        assert_eq!(cmd.get_program(), OsStr::new("/bin/sh"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], OsStr::new("-c"));
    }

    #[test]
    fn windows_command_runs_entry_without_outer_interpreter() {
        let invocation = Invocation {
            entry: PathBuf::from(r"C:\my plugins\a&b\run.bat"),
            input_file: PathBuf::from(r"C:\out dir\100%\input.json"),
            output_dir: PathBuf::from(r"C:\out dir\100%"),
            log_file: PathBuf::from(r"C:\out dir\100%\run.log"),
            err_file: PathBuf::from(r"C:\out dir\100%\run.err"),
        };
        let cmd = WindowsLauncher::command(&invocation);
        assert_eq!(cmd.get_program(), OsStr::new(r"C:\my plugins\a&b\run.bat"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(
            args,
            vec![
                OsStr::new(r"C:\out dir\100%\input.json"),
                OsStr::new(r"C:\out dir\100%"),
            ]
        );
    }

    #[test]
    fn launcher_matches_requested_family() {
        assert_eq!(
            launcher_for(PlatformFamily::Posix).family(),
            PlatformFamily::Posix
        );
        assert_eq!(
            launcher_for(PlatformFamily::Windows).family(),
            PlatformFamily::Windows
        );
    }

    #[cfg(windows)]
    #[test]
    fn windows_launcher_passes_paths_with_metacharacters_intact() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("my plugins & 100%");
        std::fs::create_dir_all(&dir).unwrap();
        let entry = dir.join("run.bat");
        std::fs::write(
            &entry,
            "@echo off\r\necho in=%1\r\necho out=%2\r\nexit /b 3\r\n",
        )
        .unwrap();

        let invocation = Invocation {
            entry,
            input_file: dir.join("input.json"),
            output_dir: dir.clone(),
            log_file: dir.join("run.log"),
            err_file: dir.join("run.err"),
        };
        let code = WindowsLauncher.execute(&invocation).expect("launch");
        assert_eq!(code, 3);

        let log = std::fs::read_to_string(&invocation.log_file).unwrap();
        let expected_in = format!("in={}", invocation.input_file.display());
        let expected_out = format!("out={}", invocation.output_dir.display());
        assert!(log.contains(&expected_in), "{log}");
        assert!(log.contains(&expected_out), "{log}");
    }

    #[cfg(unix)]
    #[test]
    fn posix_launcher_redirects_output_and_returns_exit_code() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("run it.sh");
        std::fs::write(&entry, "#!/bin/sh\necho \"in=$1\"\necho oops >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o755)).unwrap();

        let invocation = Invocation {
            entry,
            input_file: dir.path().join("input.json"),
            output_dir: dir.path().to_path_buf(),
            log_file: dir.path().join("run.log"),
            err_file: dir.path().join("run.err"),
        };
        let code = PosixLauncher.execute(&invocation).expect("launch");
        assert_eq!(code, 3);

        let log = std::fs::read_to_string(&invocation.log_file).unwrap();
        assert!(log.contains("input.json"));
        let err = std::fs::read_to_string(&invocation.err_file).unwrap();
        assert_eq!(err.trim(), "oops");
    }
}
