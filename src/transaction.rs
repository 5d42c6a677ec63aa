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

//! Transaction records.
//!
//! Every money movement leaves one [`TransactionRecord`] in the log. Records
//! are an audit trail; balances on the accounts remain authoritative.
//!
//! Status follows a one-way state machine:
//!
//! ```text
//!  Pending ──collect──► Completed
//!     │
//!     └──────────────► Failed
//! ```
//!
//! A `course_purchase` is born `Completed` together with its enrollment. A
//! sale-originated `instructor_payout` is born `Pending` and only completes
//! when the instructor collects it.

use crate::base::{BankReference, CourseId, RecordId, UserId};
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CoursePurchase,
    InstructorPayout,
    CourseUploadPayout,
    LmsFee,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One side of a money movement.
///
/// The treasury is always named explicitly, never represented by an absent
/// user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Party {
    Treasury,
    User(UserId),
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Treasury => f.write_str("treasury"),
            Party::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// A record before the log has assigned its id.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub from: Party,
    pub to: Party,
    pub course: CourseId,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub bank_reference: Option<BankReference>,
    pub origin: Option<RecordId>,
    pub description: String,
}

impl RecordDraft {
    /// Completed learner payment into the treasury.
    pub fn course_purchase(
        learner: UserId,
        course: CourseId,
        amount: Decimal,
        reference: BankReference,
        title: &str,
    ) -> Self {
        Self {
            from: Party::User(learner),
            to: Party::Treasury,
            course,
            amount,
            kind: TransactionKind::CoursePurchase,
            status: TransactionStatus::Completed,
            bank_reference: Some(reference),
            origin: None,
            description: format!("Purchase of course: {title}"),
        }
    }

    /// Pending payout owed to the instructor for the sale recorded as `origin`.
    pub fn sale_payout(
        instructor: UserId,
        course: CourseId,
        amount: Decimal,
        origin: RecordId,
        title: &str,
    ) -> Self {
        Self {
            from: Party::Treasury,
            to: Party::User(instructor),
            course,
            amount,
            kind: TransactionKind::InstructorPayout,
            status: TransactionStatus::Pending,
            bank_reference: None,
            origin: Some(origin),
            description: format!("Payout for course sale: {title}"),
        }
    }

    /// Completed lump-sum payout made when a course is published.
    pub fn upload_payout(
        instructor: UserId,
        course: CourseId,
        amount: Decimal,
        reference: BankReference,
        title: &str,
    ) -> Self {
        Self {
            from: Party::Treasury,
            to: Party::User(instructor),
            course,
            amount,
            kind: TransactionKind::CourseUploadPayout,
            status: TransactionStatus::Completed,
            bank_reference: Some(reference),
            origin: None,
            description: format!("Lump sum payout for course upload: {title}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: RecordId,
    pub from: Party,
    pub to: Party,
    pub course: CourseId,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub bank_reference: Option<BankReference>,
    /// Purchase record a sale payout settles.
    pub origin: Option<RecordId>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub(crate) fn from_draft(id: RecordId, draft: RecordDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            from: draft.from,
            to: draft.to,
            course: draft.course,
            amount: draft.amount,
            kind: draft.kind,
            status: draft.status,
            bank_reference: draft.bank_reference,
            origin: draft.origin,
            description: draft.description,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` if the user is payer or payee.
    pub fn involves(&self, user: UserId) -> bool {
        self.from == Party::User(user) || self.to == Party::User(user)
    }

    /// `true` for an uncollected sale payout addressed to `instructor`.
    pub fn is_pending_payout_for(&self, instructor: UserId) -> bool {
        self.kind == TransactionKind::InstructorPayout
            && self.status == TransactionStatus::Pending
            && self.to == Party::User(instructor)
    }

    /// Transitions `Pending -> Completed`, attaching the settling reference.
    ///
    /// # Errors
    ///
    /// [`SettlementError::Invariant`] unless the record is pending.
    pub fn complete(&mut self, reference: BankReference) -> Result<(), SettlementError> {
        if self.status != TransactionStatus::Pending {
            return Err(SettlementError::Invariant("transaction is not pending"));
        }
        self.status = TransactionStatus::Completed;
        self.bank_reference = Some(reference);
        self.updated_at = Utc::now();
        Ok(())
    }
}
