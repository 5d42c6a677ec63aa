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

//! # LMS Settlement
//!
//! Ledger and settlement core for a learning platform: learners buy courses
//! from a platform treasury, instructors collect their share, and completed
//! enrollments earn certificates.
//!
//! ## Core Components
//!
//! - [`Engine`]: settlement orchestrator exposing every workflow
//! - [`Bank`]: account-to-account transfers and receipt validation
//! - [`BankAccount`]: balance embedded in a [`User`] or the [`Treasury`]
//! - [`TransactionLog`]: audit trail of every money movement
//! - [`SettlementError`]: error taxonomy shared by all workflows
//!
//! ## Example
//!
//! ```
//! use lms_settlement::{BankAccount, Caller, Config, Engine, NewCourse, Role, UserId};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new(Config::default());
//! let account = |n: u32| BankAccount::new(format!("ACC{n}"), Some(format!("key-{n}")), dec!(10000));
//! engine.register_user(UserId(1), "Lea", Role::Learner, account(1)).unwrap();
//! engine.register_user(UserId(2), "Ian", Role::Instructor, account(2)).unwrap();
//!
//! let instructor = Caller::new(UserId(2), Role::Instructor);
//! let course = engine
//!     .publish_course(instructor, NewCourse::new("Ownership", dec!(99)))
//!     .unwrap()
//!     .course;
//!
//! let purchase = engine.purchase(UserId(1), course.id).unwrap();
//! assert_eq!(engine.get_balance(UserId(1)).unwrap().balance, dec!(9901));
//!
//! let payout = purchase.payout.unwrap();
//! engine.collect_payout(instructor, payout.id).unwrap();
//! assert_eq!(engine.get_balance(UserId(2)).unwrap().balance, dec!(10069.3));
//! ```
//!
//! ## Thread Safety
//!
//! Each account sits behind its own mutex and entity maps are sharded, so
//! settlements for different learners run in parallel; only their shared use
//! of the treasury is serialized.

pub mod account;
mod bank;
mod base;
mod certificate;
mod config;
mod course;
mod engine;
mod enrollment;
pub mod error;
mod transaction;
mod transaction_log;
mod treasury;
mod user;

pub use account::{Balance, BankAccount};
pub use bank::{Bank, Receipt};
pub use base::{BankReference, Caller, CourseId, RecordId, Role, UserId};
pub use certificate::{Certificate, Certificates};
pub use config::{Config, Monetization};
pub use course::{Course, NewCourse};
pub use engine::{
    Engine, OrganizationStats, PayoutOutcome, PendingPayouts, PublishOutcome, PurchaseOutcome,
};
pub use enrollment::{Enrollment, Enrollments};
pub use error::{Entity, SettlementError};
pub use transaction::{Party, RecordDraft, TransactionKind, TransactionRecord, TransactionStatus};
pub use transaction_log::TransactionLog;
pub use treasury::{OrganizationBalance, Treasury};
pub use user::User;
