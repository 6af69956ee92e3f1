//! Contract directory layout and staging writes.
//!
//! # Responsibility
//! - Derive the contract directory and its five artifact paths.
//! - Write the source text and input payload handed to a plugin process.
//!
//! # Invariants
//! - Paths are a pure function of address, plugin name, attempt id and
//!   configuration.
//! - Staging never deletes files that already exist in the directory.
//! - The caller `stdin` value is embedded without validation.

use crate::config::KernelConfig;
use crate::workspace::Address;
use log::warn;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CODE_FILE_NAME: &str = "code.txt";
pub const INPUT_FILE_NAME: &str = "input.json";
pub const OUTPUT_FILE_NAME: &str = "output.json";
pub const LOG_FILE_NAME: &str = "run.log";
pub const ERR_FILE_NAME: &str = "run.err";

const EMPTY_OBJECT: &str = "{}";

/// Identifier of one run attempt, used as the innermost path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptId(String);

impl AttemptId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AttemptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bank, register and address rendered with the configured numeral settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAddress {
    pub bank: String,
    pub reg: String,
    pub addr: String,
}

/// Contract directory and the files exchanged with the plugin process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractPaths {
    pub directory: PathBuf,
    pub code_file: PathBuf,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub log_file: PathBuf,
    pub err_file: PathBuf,
}

impl ContractPaths {
    fn in_directory(directory: PathBuf) -> Self {
        Self {
            code_file: directory.join(CODE_FILE_NAME),
            input_file: directory.join(INPUT_FILE_NAME),
            output_file: directory.join(OUTPUT_FILE_NAME),
            log_file: directory.join(LOG_FILE_NAME),
            err_file: directory.join(ERR_FILE_NAME),
            directory,
        }
    }
}

/// Computes and prepares contract directories under the configured output root.
#[derive(Debug, Clone)]
pub struct ContractLayout {
    config: KernelConfig,
}

impl ContractLayout {
    pub fn new(config: KernelConfig) -> Self {
        Self { config }
    }

    pub fn encode(&self, address: Address) -> EncodedAddress {
        EncodedAddress {
            bank: self.config.encode_bank(address.bank),
            reg: self.config.encode_reg(address.register),
            addr: self.config.encode_addr(address.slot),
        }
    }

    /// Pure path computation; touches nothing on disk.
    ///
    /// `attempt` is only used when attempt isolation is enabled.
    pub fn paths_for(
        &self,
        address: Address,
        plugin_name: &str,
        attempt: Option<&AttemptId>,
    ) -> ContractPaths {
        let encoded = self.encode(address);
        let mut directory = self
            .config
            .output_root
            .join(&encoded.bank)
            .join(format!("r{}a{}", encoded.reg, encoded.addr))
            .join(plugin_name);
        if self.config.attempt_isolation {
            if let Some(attempt) = attempt {
                directory.push(attempt.as_str());
            }
        }
        ContractPaths::in_directory(directory)
    }

    /// Computes the contract paths and creates the directory chain.
    pub fn stage(
        &self,
        address: Address,
        plugin_name: &str,
        attempt: Option<&AttemptId>,
    ) -> io::Result<ContractPaths> {
        let paths = self.paths_for(address, plugin_name, attempt);
        std::fs::create_dir_all(&paths.directory)?;
        Ok(paths)
    }
}

/// Picks the text embedded as the `stdin` field of the input payload.
///
/// - Existing path: that file's contents.
/// - Any other non-empty value: the value itself, verbatim.
/// - Empty value, an empty file, or an existing path that cannot be read
///   (including a directory): `{}`.
pub fn resolve_stdin(stdin_json_or_path: &str) -> String {
    if stdin_json_or_path.is_empty() {
        return EMPTY_OBJECT.to_string();
    }
    let candidate = Path::new(stdin_json_or_path);
    let text = if candidate.exists() {
        match std::fs::read_to_string(candidate) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    "event=stdin_read module=contract status=error path={} error={}",
                    candidate.display(),
                    err
                );
                String::new()
            }
        }
    } else {
        stdin_json_or_path.to_string()
    };
    if text.is_empty() {
        EMPTY_OBJECT.to_string()
    } else {
        text
    }
}

/// Renders the input payload document.
///
/// String fields are JSON-escaped; `stdin` is spliced in as given.
pub fn build_input_payload(
    encoded: &EncodedAddress,
    title: &str,
    code_file: &Path,
    stdin: &str,
) -> String {
    let stdin = if stdin.is_empty() { EMPTY_OBJECT } else { stdin };
    let code_file = code_file.to_string_lossy();
    format!(
        "{{\n  \"bank\": {},\n  \"reg\": {},\n  \"addr\": {},\n  \"title\": {},\n  \"code_file\": {},\n  \"stdin\": {}\n}}\n",
        json_string(&encoded.bank),
        json_string(&encoded.reg),
        json_string(&encoded.addr),
        json_string(title),
        json_string(&code_file),
        stdin
    )
}

/// Writes `text` to `path`, truncating any previous content.
pub fn write_text_file(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)
}

fn json_string(value: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| String::from("\"\""))
}
