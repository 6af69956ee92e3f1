//! Core of bankrun: a plugin-execution kernel over an addressable bank store.
//!
//! A run resolves a (bank, register, address) coordinate to source text,
//! stages it with caller input into a contract directory, launches a plugin
//! entry script and collects the plugin's output file.

pub mod config;
pub mod db;
pub mod logging;
pub mod plugin;
pub mod store;
pub mod workspace;

pub use config::{to_base_n, ConfigError, KernelConfig, PlatformFamily};
pub use logging::{default_log_level, init_logging, logging_status};
pub use plugin::contract::{AttemptId, ContractLayout, ContractPaths, EncodedAddress};
pub use plugin::invoker::{
    launcher_for, Invocation, LaunchError, PosixLauncher, ProcessLauncher, WindowsLauncher,
};
pub use plugin::kernel::{
    ExecutionOutcome, Kernel, KernelError, RunErrorKind, RunReport, RunRequest,
};
pub use plugin::manifest::{ManifestParseError, ManifestSnapshot, PluginManifest};
pub use store::bank_store::{BankSummary, SqliteBankStore, StoreError, StoreResult};
pub use workspace::{Address, Resolver, RevisitGuard, Workspace, WorkspaceError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
