//! SQLite-backed bank store.
//!
//! # Responsibility
//! - Persist bank titles and the text stored at each (bank, reg, addr).
//! - Serve the kernel's `Workspace` and `Resolver` contracts.
//!
//! # Invariants
//! - A cell can only exist inside a known bank.
//! - Reference expansion never revisits an address already on the current
//!   expansion path; such tokens are left as written.
//! - Expansion stops at `MAX_REFERENCE_DEPTH` nested references and after
//!   `MAX_EXPANDED_BYTES` of fetched text; tokens past either limit are left
//!   as written.
//!
//! Reference syntax inside stored text: `{{reg:addr}}` (same bank) or
//! `{{bank:reg:addr}}`, each number written in the configured numeral base.

use crate::config::from_base_n;
use crate::db::DbError;
use crate::workspace::{Address, Resolver, RevisitGuard, Workspace, WorkspaceError};
use log::warn;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*(?:([0-9A-Za-z]+)\s*:\s*)?([0-9A-Za-z]+)\s*:\s*([0-9A-Za-z]+)\s*\}\}")
        .expect("valid reference regex")
});

/// Deepest chain of nested references that is followed.
pub const MAX_REFERENCE_DEPTH: usize = 64;
/// Total bytes of referenced text one expansion may pull in.
pub const MAX_EXPANDED_BYTES: usize = 256 * 1024;

pub type StoreResult<T> = Result<T, StoreError>;

/// Bank store errors.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Coordinate does not fit SQLite's signed 64-bit integer.
    OutOfRange(u64),
    BankNotFound(u64),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::OutOfRange(value) => write!(f, "coordinate {value} exceeds storable range"),
            Self::BankNotFound(bank) => write!(f, "bank not found: {bank}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::OutOfRange(_) | Self::BankNotFound(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Listing row for one bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSummary {
    pub id: u64,
    pub title: String,
    pub cells: u64,
}

/// Mutable state of one `resolve_references` call.
struct Expansion<'g> {
    guard: &'g mut RevisitGuard,
    depth: usize,
    remaining: usize,
    depth_capped: bool,
    size_capped: bool,
}

/// Bank store over one borrowed connection.
pub struct SqliteBankStore<'conn> {
    conn: &'conn Connection,
    base: u32,
}

impl<'conn> SqliteBankStore<'conn> {
    /// `base` is the numeral base used to read reference tokens.
    pub fn new(conn: &'conn Connection, base: u32) -> Self {
        Self { conn, base }
    }

    /// Creates a bank or renames an existing one.
    pub fn upsert_bank(&self, bank: u64, title: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO banks (id, title) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title;",
            params![sql_int(bank)?, title],
        )?;
        Ok(())
    }

    /// Stores `value` at `address`, replacing any previous text.
    ///
    /// # Errors
    /// - `StoreError::BankNotFound` when the bank has not been created.
    pub fn set_value(&self, address: Address, value: &str) -> StoreResult<()> {
        if !self.bank_exists(address.bank)? {
            return Err(StoreError::BankNotFound(address.bank));
        }
        self.conn.execute(
            "INSERT INTO cells (bank, reg, addr, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(bank, reg, addr) DO UPDATE SET
                value = excluded.value,
                updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000);",
            params![
                sql_int(address.bank)?,
                sql_int(address.register)?,
                sql_int(address.slot)?,
                value
            ],
        )?;
        Ok(())
    }

    /// Deletes the value at `address`. Returns whether a value existed.
    pub fn remove_value(&self, address: Address) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM cells WHERE bank = ?1 AND reg = ?2 AND addr = ?3;",
            params![
                sql_int(address.bank)?,
                sql_int(address.register)?,
                sql_int(address.slot)?
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_value(&self, address: Address) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM cells WHERE bank = ?1 AND reg = ?2 AND addr = ?3;",
                params![
                    sql_int(address.bank)?,
                    sql_int(address.register)?,
                    sql_int(address.slot)?
                ],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn bank_exists(&self, bank: u64) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM banks WHERE id = ?1);",
            [sql_int(bank)?],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// All banks ordered by id, with their cell counts.
    pub fn list_banks(&self) -> StoreResult<Vec<BankSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.title, COUNT(c.value)
             FROM banks b
             LEFT JOIN cells c ON c.bank = b.id
             GROUP BY b.id
             ORDER BY b.id ASC;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BankSummary {
                id: row.get::<_, i64>(0)?.unsigned_abs(),
                title: row.get(1)?,
                cells: row.get::<_, i64>(2)?.unsigned_abs(),
            })
        })?;
        let mut banks = Vec::new();
        for row in rows {
            banks.push(row?);
        }
        Ok(banks)
    }

    fn parse_reference(&self, caps: &Captures<'_>, current_bank: u64) -> Option<Address> {
        let bank = match caps.get(1) {
            Some(m) => from_base_n(m.as_str(), self.base)?,
            None => current_bank,
        };
        let register = from_base_n(caps.get(2)?.as_str(), self.base)?;
        let slot = from_base_n(caps.get(3)?.as_str(), self.base)?;
        Some(Address::new(bank, register, slot))
    }

    fn expand(&self, text: &str, bank: u64, state: &mut Expansion<'_>) -> String {
        REFERENCE_RE
            .replace_all(text, |caps: &Captures<'_>| {
                let token = caps[0].to_string();
                let Some(target) = self.parse_reference(caps, bank) else {
                    return token;
                };
                if state.guard.contains(&target) {
                    return token;
                }
                if state.depth >= MAX_REFERENCE_DEPTH {
                    state.depth_capped = true;
                    return token;
                }
                if state.remaining == 0 {
                    state.size_capped = true;
                    return token;
                }
                let Some(raw) = self.fetch_raw(target) else {
                    return token;
                };
                if raw.len() > state.remaining {
                    state.size_capped = true;
                    return token;
                }
                state.remaining -= raw.len();

                state.guard.insert(target);
                state.depth += 1;
                let expanded = self.expand(&raw, target.bank, state);
                state.depth -= 1;
                state.guard.remove(&target);
                expanded
            })
            .into_owned()
    }
}

impl Workspace for SqliteBankStore<'_> {
    fn ensure_bank_loaded(&self, bank: u64) -> Result<(), WorkspaceError> {
        match self.bank_exists(bank) {
            Ok(true) => Ok(()),
            Ok(false) => Err(WorkspaceError::BankNotFound(bank)),
            Err(err) => Err(WorkspaceError::Unavailable(err.to_string())),
        }
    }

    fn bank_title(&self, bank: u64) -> Option<String> {
        let result = sql_int(bank).and_then(|id| {
            self.conn
                .query_row("SELECT title FROM banks WHERE id = ?1;", [id], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
                .map_err(StoreError::from)
        });
        match result {
            Ok(title) => title,
            Err(err) => {
                warn!(
                    "event=bank_title module=store status=error bank={} error={}",
                    bank, err
                );
                None
            }
        }
    }
}

impl Resolver for SqliteBankStore<'_> {
    fn fetch_raw(&self, address: Address) -> Option<String> {
        match self.get_value(address) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "event=fetch_raw module=store status=error address=\"{}\" error={}",
                    address, err
                );
                None
            }
        }
    }

    fn resolve_references(&self, raw: &str, bank: u64, guard: &mut RevisitGuard) -> String {
        let mut state = Expansion {
            guard,
            depth: 0,
            remaining: MAX_EXPANDED_BYTES,
            depth_capped: false,
            size_capped: false,
        };
        let resolved = self.expand(raw, bank, &mut state);
        if state.depth_capped {
            warn!(
                "event=reference_expand module=store status=truncated bank={} reason=depth limit={}",
                bank, MAX_REFERENCE_DEPTH
            );
        }
        if state.size_capped {
            warn!(
                "event=reference_expand module=store status=truncated bank={} reason=size limit={}",
                bank, MAX_EXPANDED_BYTES
            );
        }
        resolved
    }
}

fn sql_int(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(value))
}
