//! Collaborator contracts consumed by the plugin kernel.
//!
//! # Responsibility
//! - Name the coordinate type shared by the kernel and the bank store.
//! - Define the workspace and resolver seams the kernel runs against.
//!
//! # Invariants
//! - The kernel never materializes values itself; it only calls these traits.
//! - Cycle detection policy belongs to the resolver; the kernel only owns the
//!   guard state for one run.

use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Three-part coordinate of one value inside a bank store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub bank: u64,
    pub register: u64,
    pub slot: u64,
}

impl Address {
    pub fn new(bank: u64, register: u64, slot: u64) -> Self {
        Self {
            bank,
            register,
            slot,
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bank {} reg {} addr {}",
            self.bank, self.register, self.slot
        )
    }
}

/// Addresses already on the current reference-following path.
pub type RevisitGuard = HashSet<Address>;

/// Bank metadata and load assurance.
pub trait Workspace {
    /// Makes sure `bank` is available for reads.
    fn ensure_bank_loaded(&self, bank: u64) -> Result<(), WorkspaceError>;

    /// Display title of `bank`, if the bank is known.
    fn bank_title(&self, bank: u64) -> Option<String>;
}

/// Value lookup and reference following.
pub trait Resolver {
    /// Raw stored text at `address`, before any reference is followed.
    fn fetch_raw(&self, address: Address) -> Option<String>;

    /// Expands references in `raw`, interpreted relative to `bank`.
    ///
    /// Addresses present in `guard` must not be expanded again.
    fn resolve_references(&self, raw: &str, bank: u64, guard: &mut RevisitGuard) -> String;
}

/// Failures reported by a workspace implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    BankNotFound(u64),
    Unavailable(String),
}

impl Display for WorkspaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BankNotFound(bank) => write!(f, "bank {bank} is not present in the store"),
            Self::Unavailable(message) => write!(f, "bank store unavailable: {message}"),
        }
    }
}

impl Error for WorkspaceError {}
