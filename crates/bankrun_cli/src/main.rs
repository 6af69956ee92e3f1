//! Command-line front end for the bankrun kernel.
//!
//! # Responsibility
//! - Manage banks and values in a local store file.
//! - List discovered plugins and run one against a stored value.

use bankrun_core::db::open_db;
use bankrun_core::{
    default_log_level, init_logging, Address, Kernel, KernelConfig, RunReport, RunRequest,
    SqliteBankStore,
};
use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_DB_PATH: &str = "files/banks.sqlite3";

const USAGE: &str = "usage: bankrun [--config FILE] [--db FILE] [--log-dir DIR] <command>

commands:
  list                                   list discovered plugins
  banks                                  list banks in the store
  bank-add <bank> <title>                create or rename a bank
  value-set <bank> <reg> <addr> <text>   store text at a coordinate
  run <plugin> <bank> <reg> <addr> [stdin-json-or-path]
                                         run a plugin against a stored value";

struct Options {
    config: Option<PathBuf>,
    db: PathBuf,
    log_dir: Option<PathBuf>,
    command: Vec<String>,
}

fn main() -> ExitCode {
    let options = match parse_options(std::env::args().skip(1).collect()) {
        Ok(options) => options,
        Err(message) if message.is_empty() => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{message}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    match execute(&options) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_options(args: Vec<String>) -> Result<Options, String> {
    let mut options = Options {
        config: None,
        db: PathBuf::from(DEFAULT_DB_PATH),
        log_dir: None,
        command: Vec::new(),
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => options.config = Some(flag_value(&mut args, "--config")?),
            "--db" => options.db = flag_value(&mut args, "--db")?,
            "--log-dir" => options.log_dir = Some(flag_value(&mut args, "--log-dir")?),
            "-h" | "--help" => return Err(String::new()),
            _ => {
                options.command.push(arg.clone());
                options.command.extend(args.by_ref());
            }
        }
    }
    if options.command.is_empty() {
        return Err("missing command".to_string());
    }
    Ok(options)
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf, String> {
    args.next()
        .map(PathBuf::from)
        .ok_or_else(|| format!("{flag} needs a value"))
}

fn execute(options: &Options) -> Result<ExitCode, Box<dyn Error>> {
    let config = match &options.config {
        Some(path) => KernelConfig::from_json_file(path)?,
        None => KernelConfig::default(),
    };
    if let Some(dir) = &options.log_dir {
        init_logging(default_log_level(), absolute(dir)?)?;
    }

    let args: Vec<&str> = options.command.iter().map(String::as_str).collect();
    info!(
        "event=cli_command module=cli status=start command={}",
        args.first().copied().unwrap_or_default()
    );
    match args.as_slice() {
        ["list"] => {
            let kernel = Kernel::new(config);
            if kernel.list().is_empty() {
                println!("(no plugins)");
            }
            for plugin in kernel.list() {
                println!(" - {} @ {}", plugin.name, plugin.directory.display());
            }
            for rejected in kernel.snapshot().rejected() {
                eprintln!(
                    "skipped {}: {}",
                    rejected.directory.display(),
                    rejected.reason
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        ["banks"] => {
            let conn = open_store(&options.db)?;
            let store = SqliteBankStore::new(&conn, config.base);
            for bank in store.list_banks()? {
                println!(
                    "{} {} ({} values)",
                    config.encode_bank(bank.id),
                    bank.title,
                    bank.cells
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        ["bank-add", bank, title] => {
            let conn = open_store(&options.db)?;
            SqliteBankStore::new(&conn, config.base).upsert_bank(parse_number(bank)?, title)?;
            Ok(ExitCode::SUCCESS)
        }
        ["value-set", bank, reg, addr, text] => {
            let conn = open_store(&options.db)?;
            let address = parse_address(bank, reg, addr)?;
            SqliteBankStore::new(&conn, config.base).set_value(address, text)?;
            Ok(ExitCode::SUCCESS)
        }
        ["run", plugin, bank, reg, addr, rest @ ..] if rest.len() <= 1 => {
            let conn = open_store(&options.db)?;
            let store = SqliteBankStore::new(&conn, config.base);
            let kernel = Kernel::new(config);
            let request = RunRequest::new(*plugin, parse_address(bank, reg, addr)?)
                .with_stdin(rest.first().copied().unwrap_or_default());

            let report = RunReport::from(kernel.run(&store, &request));
            eprint!("{}", report.report);
            if let Some(payload) = &report.payload {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(payload)?;
                stdout.flush()?;
            }
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(ExitCode::from(2))
        }
    }
}

fn open_store(path: &Path) -> Result<Connection, Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(open_db(path)?)
}

fn parse_address(bank: &str, reg: &str, addr: &str) -> Result<Address, Box<dyn Error>> {
    Ok(Address::new(
        parse_number(bank)?,
        parse_number(reg)?,
        parse_number(addr)?,
    ))
}

fn parse_number(value: &str) -> Result<u64, Box<dyn Error>> {
    value
        .parse::<u64>()
        .map_err(|err| format!("`{value}` is not a non-negative integer: {err}").into())
}

fn absolute(path: &Path) -> Result<PathBuf, Box<dyn Error>> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
