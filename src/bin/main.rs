// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use lms_settlement::{
    Caller, Config, CourseId, Engine, Entity, Monetization, NewCourse, RecordId, Role,
    SettlementError, TransactionKind, TransactionStatus, UserId,
};
use lms_settlement::{BankAccount, account::DECIMAL_PRECISION};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// LMS settlement - replay a command CSV against the ledger
///
/// Reads settlement commands from a CSV file and writes the resulting
/// balances of every account holder, treasury included, to stdout.
#[derive(Parser, Debug)]
#[command(name = "lms-settlement")]
#[command(about = "Replays course purchases and payouts from a CSV", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: type,user,course,tx,amount
    /// Example: cargo run -- commands.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Also write the transaction log, in commit order, to this CSV file
    #[arg(long, value_name = "FILE")]
    audit: Option<PathBuf>,

    /// Instructor monetization model: per-sale or upload-lump-sum
    #[arg(long, env = "LMS_MONETIZATION", default_value = "per-sale")]
    monetization: Monetization,

    /// Share of the course price owed to the instructor
    #[arg(long, env = "LMS_INSTRUCTOR_SHARE", default_value = "0.7", allow_negative_numbers = true)]
    instructor_share: Decimal,

    /// Opening balance of the platform treasury
    #[arg(long, env = "LMS_TREASURY_BALANCE", default_value = "1000000")]
    treasury_balance: Decimal,

    /// Opening balance for users registered without an amount
    #[arg(long, env = "LMS_USER_BALANCE", default_value = "10000")]
    user_balance: Decimal,
}

impl Args {
    fn config(&self) -> Result<Config, String> {
        let config = Config {
            monetization: self.monetization,
            instructor_share: self.instructor_share,
            treasury_opening_balance: self.treasury_balance,
            default_user_balance: self.user_balance,
            ..Config::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match args.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_commands(BufReader::new(file), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    if let Some(path) = &args.audit {
        let written = File::create(path)
            .map_err(csv::Error::from)
            .and_then(|file| write_audit(&engine, file));
        if let Err(e) = written {
            eprintln!("Error writing audit log '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = write_balances(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, course, tx, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    command: String,
    user: u32,
    #[serde(deserialize_with = "csv::invalid_option")]
    course: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    tx: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Register {
        user: UserId,
        role: Role,
        balance: Option<Decimal>,
    },
    Publish {
        instructor: UserId,
        course: u32,
        price: Decimal,
    },
    Purchase {
        learner: UserId,
        course: u32,
    },
    Collect {
        instructor: UserId,
        record: RecordId,
    },
    Progress {
        learner: UserId,
        course: u32,
        progress: i64,
    },
}

impl CsvRecord {
    /// Returns `None` for unknown command types or missing required fields.
    fn into_command(self) -> Option<Command> {
        let user = UserId(self.user);

        let register = |role| Command::Register {
            user,
            role,
            balance: self.amount,
        };

        match self.command.to_lowercase().as_str() {
            "learner" => Some(register(Role::Learner)),
            "instructor" => Some(register(Role::Instructor)),
            "admin" => Some(register(Role::Admin)),
            "course" => Some(Command::Publish {
                instructor: user,
                course: self.course?,
                price: self.amount?,
            }),
            "purchase" => Some(Command::Purchase {
                learner: user,
                course: self.course?,
            }),
            "collect" => Some(Command::Collect {
                instructor: user,
                record: RecordId(self.tx?),
            }),
            "progress" => Some(Command::Progress {
                learner: user,
                course: self.course?,
                progress: self.amount?.trunc().to_i64()?,
            }),
            _ => None,
        }
    }
}

/// Replays commands against a fresh engine.
///
/// Course numbers in the file are the file's own labels; the engine assigns
/// the real [`CourseId`] at publication and this function maps between them.
fn apply(
    engine: &Engine,
    courses: &mut HashMap<u32, CourseId>,
    command: Command,
) -> Result<(), SettlementError> {
    let caller = |user: UserId| {
        engine
            .get_user(&user)
            .map(|u| Caller::new(user, u.role()))
            .ok_or(SettlementError::NotFound(Entity::User))
    };

    match command {
        Command::Register {
            user,
            role,
            balance,
        } => {
            let account = BankAccount::new(
                format!("ACC{user}"),
                Some(format!("secret-{user}")),
                balance.unwrap_or(engine.config().default_user_balance),
            );
            engine.register_user(user, format!("{role} {user}"), role, account)
        }
        Command::Publish {
            instructor,
            course,
            price,
        } => {
            let published = engine.publish_course(
                caller(instructor)?,
                NewCourse::new(format!("Course {course}"), price),
            )?;
            courses.insert(course, published.course.id);
            Ok(())
        }
        Command::Purchase { learner, course } => {
            engine.purchase(learner, course_id(courses, course)?).map(|_| ())
        }
        Command::Collect { instructor, record } => engine
            .collect_payout(caller(instructor)?, record)
            .map(|_| ()),
        Command::Progress {
            learner,
            course,
            progress,
        } => engine
            .update_progress(learner, course_id(courses, course)?, progress)
            .map(|_| ()),
    }
}

fn course_id(courses: &HashMap<u32, CourseId>, label: u32) -> Result<CourseId, SettlementError> {
    courses
        .get(&label)
        .copied()
        .ok_or(SettlementError::NotFound(Entity::Course))
}

/// Process commands from a CSV reader.
///
/// Streams the input so arbitrarily large files never sit in memory.
/// Malformed rows and rejected commands are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, user, course, tx, amount`
/// - `type`: learner, instructor, admin, course, purchase, collect, progress
/// - `user`: acting user id (u32)
/// - `course`: course label, for course/purchase/progress
/// - `tx`: transaction record id, for collect
/// - `amount`: opening balance, course price or progress value
///
/// # Example
///
/// ```csv
/// type,user,course,tx,amount
/// learner,1,,,10000
/// instructor,2,,,10000
/// course,2,1,,99
/// purchase,1,1,,
/// collect,2,,2,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_commands<R: Read>(reader: R, config: Config) -> Result<Engine, csv::Error> {
    let engine = Engine::new(config);
    let mut courses = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => {
                let Some(command) = record.into_command() else {
                    tracing::warn!(row, "skipping invalid command record");
                    continue;
                };

                if let Err(error) = apply(&engine, &mut courses, command.clone()) {
                    tracing::warn!(row, ?command, %error, "skipping rejected command");
                }
            }
            Err(error) => {
                tracing::warn!(row, %error, "skipping malformed row");
            }
        }
    }

    Ok(engine)
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    holder: String,
    role: String,
    account: String,
    balance: Decimal,
}

/// Write every holder's balance, treasury last, as CSV.
///
/// # CSV Format
///
/// Columns: `holder, role, account, balance`
///
/// ```csv
/// holder,role,account,balance
/// 1,learner,ACC1,9901
/// 2,instructor,ACC2,10069.3
/// treasury,organization,LMS001,1000029.7
/// ```
pub fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut rows: Vec<(UserId, BalanceRow)> = engine
        .users()
        .map(|user| {
            let snapshot = user.snapshot();
            (
                user.id(),
                BalanceRow {
                    holder: user.id().to_string(),
                    role: user.role().to_string(),
                    account: snapshot.account_number,
                    balance: snapshot.balance,
                },
            )
        })
        .collect();
    rows.sort_by_key(|(id, _)| *id);

    for (_, row) in rows {
        wtr.serialize(row)?;
    }

    let treasury = engine.get_organization_balance();
    wtr.serialize(BalanceRow {
        holder: "treasury".to_owned(),
        role: "organization".to_owned(),
        account: treasury.account_number,
        balance: treasury.balance,
    })?;

    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct AuditRow {
    id: u64,
    #[serde(rename = "type")]
    kind: TransactionKind,
    status: TransactionStatus,
    from: String,
    to: String,
    course: u32,
    amount: Decimal,
    reference: String,
}

/// Write records committed since the last drain, in commit order.
pub fn write_audit<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let log = engine.transactions();

    for record in log.drain_committed().into_iter().filter_map(|id| log.get(id)) {
        wtr.serialize(AuditRow {
            id: record.id.0,
            kind: record.kind,
            status: record.status,
            from: record.from.to_string(),
            to: record.to.to_string(),
            course: record.course.0,
            amount: record.amount.round_dp(DECIMAL_PRECISION),
            reference: record
                .bank_reference
                .map(|reference| reference.0)
                .unwrap_or_default(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
