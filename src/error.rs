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

//! Error types for settlement processing.

use crate::base::Role;
use thiserror::Error;

/// The kind of entity a [`SettlementError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Course,
    Enrollment,
    Transaction,
    PendingPayout,
    Receipt,
    Certificate,
}

impl Entity {
    fn label(self) -> &'static str {
        match self {
            Entity::User => "user",
            Entity::Course => "course",
            Entity::Enrollment => "enrollment",
            Entity::Transaction => "transaction",
            Entity::PendingPayout => "pending payout",
            Entity::Receipt => "bank receipt",
            Entity::Certificate => "certificate",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Settlement errors.
///
/// Any error raised inside a settlement workflow aborts the whole unit of
/// work; nothing is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Presented secret does not match the paying account
    #[error("invalid secret key")]
    Authorization,

    /// Payer balance is lower than the transfer amount
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Learner already holds an enrollment for the course
    #[error("already enrolled in this course")]
    AlreadyEnrolled,

    /// Referenced entity does not exist
    #[error("{0} not found")]
    NotFound(Entity),

    /// Bank reference could not be validated
    #[error("bank validation failed")]
    Validation,

    /// Operation would break a ledger invariant (negative balance, double completion)
    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Caller role is not allowed to perform the operation
    #[error("operation not permitted for role {role}")]
    Forbidden { role: Role },
}

impl SettlementError {
    /// Stable discriminant surfaced to collaborators alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Authorization => "AUTHORIZATION",
            SettlementError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            SettlementError::AlreadyEnrolled => "ALREADY_ENROLLED",
            SettlementError::NotFound(_) => "NOT_FOUND",
            SettlementError::Validation => "VALIDATION",
            SettlementError::Invariant(_) => "INVARIANT",
            SettlementError::InvalidAmount => "INVALID_AMOUNT",
            SettlementError::Forbidden { .. } => "FORBIDDEN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(SettlementError::Authorization.to_string(), "invalid secret key");
        assert_eq!(SettlementError::InsufficientFunds.to_string(), "insufficient funds");
        assert_eq!(
            SettlementError::AlreadyEnrolled.to_string(),
            "already enrolled in this course"
        );
        assert_eq!(
            SettlementError::NotFound(Entity::PendingPayout).to_string(),
            "pending payout not found"
        );
        assert_eq!(SettlementError::Validation.to_string(), "bank validation failed");
        assert_eq!(
            SettlementError::Invariant("transaction already completed").to_string(),
            "invariant violated: transaction already completed"
        );
        assert_eq!(
            SettlementError::Forbidden { role: Role::Learner }.to_string(),
            "operation not permitted for role learner"
        );
    }

    #[test]
    fn codes_are_distinct_per_variant() {
        let errors = [
            SettlementError::Authorization,
            SettlementError::InsufficientFunds,
            SettlementError::AlreadyEnrolled,
            SettlementError::NotFound(Entity::Course),
            SettlementError::Validation,
            SettlementError::Invariant("x"),
            SettlementError::InvalidAmount,
            SettlementError::Forbidden { role: Role::Admin },
        ];
        let mut codes: Vec<_> = errors.iter().map(SettlementError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = SettlementError::InsufficientFunds;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
