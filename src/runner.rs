use chrono::FixedOffset;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{
    config::{ExportConfig, VaultConfig},
    currency::format_inr,
    dto::{parse_amount, BalanceUpdate, Field, StudentRecord},
    export::{format_timestamp, to_table, write_table, ExportFormat},
    stores::{BlobStore, FileBlobStore, RecordStore},
    RollNumber,
};

pub const USAGE: &str = "\
Usage: student-vault <data-dir> <command>
Commands:
  list
  show <roll>
  set <roll> [--phonepe <amount>] [--cash <amount>]
  clear <roll> phonepe|cash
  delete <roll>
  export csv|xlsx [<output-path>]";

/// A single front-end request against the vault.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Show(RollNumber),
    Set {
        roll: RollNumber,
        update: BalanceUpdate,
    },
    Clear {
        roll: RollNumber,
        field: Field,
    },
    Delete(RollNumber),
    Export {
        format: ExportFormat,
        output: Option<PathBuf>,
    },
}

impl Command {
    /// Parses the arguments that follow the data directory.
    /// Roll numbers and amounts are validated here, before any store access.
    pub fn parse(args: &[&str]) -> Result<Self, Box<dyn Error>> {
        match args {
            ["list"] => Ok(Command::List),
            ["show", roll] => Ok(Command::Show(RollNumber::parse(roll)?)),
            ["set", roll, rest @ ..] => {
                let roll = RollNumber::parse(roll)?;
                let mut update = BalanceUpdate::default();
                let mut flags = rest.iter();
                while let Some(flag) = flags.next() {
                    let value = flags
                        .next()
                        .ok_or_else(|| format!("missing amount after {flag}"))?;
                    match *flag {
                        "--phonepe" => {
                            update.phone_pe = Some(parse_amount(Field::PhonePe, value)?)
                        }
                        "--cash" => update.cash = Some(parse_amount(Field::Cash, value)?),
                        other => return Err(format!("unknown option {other}").into()),
                    }
                }
                Ok(Command::Set { roll, update })
            }
            ["clear", roll, field] => Ok(Command::Clear {
                roll: RollNumber::parse(roll)?,
                field: field.parse()?,
            }),
            ["delete", roll] => Ok(Command::Delete(RollNumber::parse(roll)?)),
            ["export", format] => Ok(Command::Export {
                format: format.parse()?,
                output: None,
            }),
            ["export", format, output] => Ok(Command::Export {
                format: format.parse()?,
                output: Some(PathBuf::from(output)),
            }),
            _ => Err(USAGE.into()),
        }
    }
}

/// Opens the file-backed vault in `data_dir` and executes `command`,
/// writing human-readable results to `out`.
pub fn run<P, W>(data_dir: P, command: Command, out: W) -> Result<(), Box<dyn Error>>
where
    P: AsRef<Path>,
    W: Write,
{
    let data_dir = data_dir.as_ref();
    let config = VaultConfig::load_from_dir(data_dir)?;
    let backend = FileBlobStore::open(data_dir)?;
    let mut store = RecordStore::with_key(backend, config.storage_key.clone());
    execute(&mut store, &config.export, command, out)
}

/// Executes `command` against any store; `run` is this plus file-backed setup.
pub fn execute<B, W>(
    store: &mut RecordStore<B>,
    config: &ExportConfig,
    command: Command,
    mut out: W,
) -> Result<(), Box<dyn Error>>
where
    B: BlobStore,
    W: Write,
{
    let offset = config.offset()?;
    match command {
        Command::List => {
            for record in store.get_all_sorted() {
                writeln!(out, "{}", describe(&record, offset))?;
            }
            let summary = store.summary();
            writeln!(
                out,
                "{} students, PhonePe {}, Cash {}, Total {}",
                summary.students,
                format_inr(summary.phone_pe),
                format_inr(summary.cash),
                format_inr(summary.grand_total)
            )?;
        }
        Command::Show(roll) => match store.get(&roll) {
            Some(record) => writeln!(out, "{}", describe(&record, offset))?,
            None => writeln!(out, "{roll}: no record")?,
        },
        Command::Set { roll, update } => {
            let record = store.save(&roll, update)?;
            writeln!(out, "{}", describe(&record, offset))?;
        }
        Command::Clear { roll, field } => match store.clear_field(&roll, field)? {
            Some(record) => writeln!(out, "{}", describe(&record, offset))?,
            None => writeln!(out, "{roll}: no record")?,
        },
        Command::Delete(roll) => {
            store.delete(&roll)?;
            writeln!(out, "{roll}: deleted")?;
        }
        Command::Export { format, output } => {
            let path =
                output.unwrap_or_else(|| PathBuf::from(config.file_name(format.extension())));
            let file = BufWriter::new(File::create(&path)?);
            export(store, format, config, file)?;
            writeln!(out, "exported to {}", path.display())?;
        }
    }
    Ok(())
}

/// Exports every record, sorted by roll number, in the requested format.
pub fn export<B, W>(
    store: &RecordStore<B>,
    format: ExportFormat,
    config: &ExportConfig,
    writer: W,
) -> Result<(), Box<dyn Error>>
where
    B: BlobStore,
    W: Write,
{
    let records = store.get_all_sorted();
    let table = to_table(&records, config.offset()?);
    write_table(&table, format, config, writer)?;
    Ok(())
}

fn describe(record: &StudentRecord, offset: FixedOffset) -> String {
    format!(
        "{}  PhonePe {}  Cash {}  Total {}  Updated {}",
        record.roll_number,
        format_inr(record.phone_pe),
        format_inr(record.cash),
        format_inr(record.total()),
        format_timestamp(record.last_updated, offset)
    )
}
