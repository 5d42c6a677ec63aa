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

//! Settlement engine.
//!
//! The [`Engine`] ties the [`Bank`], the [`Treasury`], users, courses,
//! enrollments and the [`TransactionLog`] together. Each settlement workflow
//! is one unit of work: every check runs first, balance changes are staged on
//! copies of the locked accounts, and only then is everything written back
//! together with the new records. An error at any step leaves no trace.
//!
//! # Workflows
//!
//! - **Purchase**: learner pays the course price into the treasury, gains an
//!   enrollment, and (per-sale model) the instructor is owed a pending payout.
//! - **Payout collection**: instructor collects a pending payout; the treasury
//!   pays it and the record completes.
//! - **Publication**: under the lump-sum model the instructor is paid their
//!   share as soon as the course is published.
//!
//! # Locking
//!
//! Workflows lock in a fixed order: user account, then treasury, then the
//! enrollment or record shard they write. Every workflow that moves treasury
//! money holds the treasury lock for its whole unit of work, which serializes
//! updates to its balance and totals.

use crate::account::{Balance, BankAccount, DECIMAL_PRECISION};
use crate::bank::Bank;
use crate::base::{BankReference, Caller, CourseId, RecordId, Role, UserId};
use crate::certificate::{Certificate, Certificates};
use crate::config::{Config, Monetization};
use crate::course::{Course, NewCourse};
use crate::enrollment::{Enrollment, Enrollments};
use crate::error::{Entity, SettlementError};
use crate::transaction::{RecordDraft, TransactionRecord};
use crate::transaction_log::TransactionLog;
use crate::treasury::{OrganizationBalance, Treasury};
use crate::user::User;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::multiple::RefMulti;
use dashmap::mapref::one::Ref;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

const RECENT_TRANSACTIONS: usize = 10;

/// Result of a committed purchase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOutcome {
    pub enrollment: Enrollment,
    pub transaction: TransactionRecord,
    /// Pending instructor payout created by the sale, if the model has one.
    pub payout: Option<TransactionRecord>,
    pub bank_reference: BankReference,
}

/// Result of a collected payout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutOutcome {
    pub transaction: TransactionRecord,
    pub payout_amount: Decimal,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayouts {
    pub pending_payouts: Vec<TransactionRecord>,
    pub total_pending: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub course: Course,
    /// Lump-sum payout, only under [`Monetization::UploadLumpSum`].
    pub payout: Option<TransactionRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationStats {
    pub total_instructors: usize,
    pub total_learners: usize,
    pub total_courses: usize,
    pub total_transactions: usize,
    pub total_revenue: Decimal,
    pub total_payouts: Decimal,
    pub current_balance: Decimal,
    pub recent_transactions: Vec<TransactionRecord>,
}

/// Ledger and settlement core.
///
/// # Invariants
///
/// - Balances never go negative.
/// - Treasury balance equals opening balance + revenue - payouts.
/// - At most one enrollment per (learner, course).
/// - A completed transaction is never completed again.
pub struct Engine {
    config: Config,
    bank: Arc<Bank>,
    treasury: Treasury,
    users: DashMap<UserId, User>,
    courses: DashMap<CourseId, Course>,
    course_sequence: AtomicU32,
    enrollments: Enrollments,
    transactions: TransactionLog,
    certificates: Certificates,
}

impl Engine {
    /// Creates an engine with its own [`Bank`].
    pub fn new(config: Config) -> Self {
        Self::with_bank(config, Arc::new(Bank::new()))
    }

    /// Creates an engine that settles through an existing [`Bank`].
    pub fn with_bank(config: Config, bank: Arc<Bank>) -> Self {
        let treasury = Treasury::new(
            config.treasury_name.clone(),
            BankAccount::new(
                config.treasury_account_number.clone(),
                None,
                config.treasury_opening_balance,
            ),
        );
        Engine {
            config,
            bank,
            treasury,
            users: DashMap::new(),
            courses: DashMap::new(),
            course_sequence: AtomicU32::new(0),
            enrollments: Enrollments::new(),
            transactions: TransactionLog::new(),
            certificates: Certificates::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }

    pub fn transactions(&self) -> &TransactionLog {
        &self.transactions
    }

    // === Users ===

    /// Registers a user with its bank account.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::InvalidAmount`] - negative opening balance.
    /// - [`SettlementError::Invariant`] - id already registered.
    pub fn register_user(
        &self,
        id: UserId,
        name: impl Into<String>,
        role: Role,
        account: BankAccount,
    ) -> Result<(), SettlementError> {
        if account.balance() < Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        match self.users.entry(id) {
            Entry::Occupied(_) => Err(SettlementError::Invariant("user already registered")),
            Entry::Vacant(entry) => {
                entry.insert(User::new(id, name, role, account));
                tracing::debug!(user = %id, %role, "user registered");
                Ok(())
            }
        }
    }

    /// Replaces a user's account number and secret; the balance is kept.
    pub fn setup_bank_account(
        &self,
        user_id: UserId,
        account_number: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Balance, SettlementError> {
        let user = self.user(user_id)?;
        let mut account = user.lock_account();
        account.set_credentials(account_number.into(), secret_key.into());
        Ok(account.snapshot())
    }

    /// Returns an iterator over all users, for reporting.
    pub fn users(&self) -> impl Iterator<Item = RefMulti<'_, UserId, User>> {
        self.users.iter()
    }

    pub fn get_user(&self, id: &UserId) -> Option<Ref<'_, UserId, User>> {
        self.users.get(id)
    }

    pub fn get_balance(&self, holder: UserId) -> Result<Balance, SettlementError> {
        Ok(self.user(holder)?.snapshot())
    }

    /// Treasury balance and totals for in-process collaborators.
    ///
    /// Callers acting for a user go through [`Engine::organization_balance`].
    pub fn get_organization_balance(&self) -> OrganizationBalance {
        self.treasury.snapshot()
    }

    /// Treasury balance and totals, for admins only.
    pub fn organization_balance(&self, caller: Caller) -> Result<OrganizationBalance, SettlementError> {
        require_role(caller, Role::Admin)?;
        Ok(self.treasury.snapshot())
    }

    // === Courses ===

    pub fn course(&self, id: CourseId) -> Option<Course> {
        self.courses.get(&id).map(|course| course.clone())
    }

    /// Publishes a course owned by `caller`.
    ///
    /// The instructor's share is fixed here as `price * instructor_share`.
    /// Under [`Monetization::UploadLumpSum`] the treasury pays it out at once
    /// and a completed `course_upload_payout` is recorded.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::Forbidden`] - caller is not an instructor.
    /// - [`SettlementError::NotFound`] - caller has no account.
    /// - [`SettlementError::InvalidAmount`] - non-positive price, or an
    ///   instructor share that is not positive once rounded.
    /// - [`SettlementError::InsufficientFunds`] - treasury cannot fund the lump sum.
    pub fn publish_course(
        &self,
        caller: Caller,
        course: NewCourse,
    ) -> Result<PublishOutcome, SettlementError> {
        require_role(caller, Role::Instructor)?;
        if course.price <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        let instructor = self.user(caller.id)?;

        let instructor_payout = (course.price * self.config.instructor_share)
            .round_dp(DECIMAL_PRECISION);
        // A payout that rounds to nothing could never be collected.
        if instructor_payout <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        let id = CourseId(self.course_sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let course = Course {
            id,
            title: course.title,
            instructor: caller.id,
            price: course.price,
            instructor_payout,
        };

        let payout = match self.config.monetization {
            Monetization::PerSale => None,
            Monetization::UploadLumpSum => Some(
                self.settle_upload_payout(&instructor, &course)
                    .inspect_err(|error| {
                        tracing::warn!(instructor = %caller.id, %error, "course publication aborted");
                    })?,
            ),
        };

        self.courses.insert(id, course.clone());
        tracing::info!(
            course = %id,
            instructor = %caller.id,
            price = %course.price,
            %instructor_payout,
            "course published"
        );
        Ok(PublishOutcome { course, payout })
    }

    fn settle_upload_payout(
        &self,
        instructor: &User,
        course: &Course,
    ) -> Result<TransactionRecord, SettlementError> {
        let mut instructor_account = instructor.lock_account();
        let mut treasury = self.treasury.lock();

        let mut instructor_next = instructor_account.clone();
        let mut treasury_next = treasury.clone();
        let receipt = self.bank.payout(
            &mut treasury_next.account,
            &mut instructor_next,
            course.instructor_payout,
        )?;
        treasury_next.record_payout(course.instructor_payout);

        *instructor_account = instructor_next;
        *treasury = treasury_next;
        debug_assert!(treasury.reconciles());

        Ok(self.transactions.append(RecordDraft::upload_payout(
            instructor.id(),
            course.id,
            course.instructor_payout,
            receipt.transaction_id,
            &course.title,
        )))
    }

    // === Settlement ===

    /// Buys `course_id` for `learner_id`.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NotFound`] - unknown course or learner.
    /// - [`SettlementError::AlreadyEnrolled`] - learner already owns the course.
    /// - [`SettlementError::Authorization`] - learner account has no valid secret.
    /// - [`SettlementError::InsufficientFunds`] - learner cannot afford the price.
    pub fn purchase(
        &self,
        learner_id: UserId,
        course_id: CourseId,
    ) -> Result<PurchaseOutcome, SettlementError> {
        let course = self
            .course(course_id)
            .ok_or(SettlementError::NotFound(Entity::Course))?;
        let learner = self.user(learner_id)?;

        let outcome = self.settle_purchase(&learner, &course).inspect_err(|error| {
            tracing::warn!(learner = %learner_id, course = %course_id, %error, "purchase aborted");
        })?;

        tracing::info!(
            learner = %learner_id,
            course = %course_id,
            amount = %course.price,
            reference = %outcome.bank_reference,
            "purchase settled"
        );
        Ok(outcome)
    }

    fn settle_purchase(
        &self,
        learner: &User,
        course: &Course,
    ) -> Result<PurchaseOutcome, SettlementError> {
        let mut learner_account = learner.lock_account();
        let mut treasury = self.treasury.lock();

        // Claimed before any money moves; dropping it on error frees the slot.
        let slot = self.enrollments.reserve(learner.id(), course.id)?;

        let secret = learner_account
            .secret_key()
            .map(str::to_owned)
            .ok_or(SettlementError::Authorization)?;

        let mut learner_next = learner_account.clone();
        let mut treasury_next = treasury.clone();
        let receipt = self.bank.transfer(
            &mut learner_next,
            &mut treasury_next.account,
            course.price,
            Some(&secret),
        )?;
        treasury_next.record_revenue(course.price);

        // Commit.
        *learner_account = learner_next;
        *treasury = treasury_next;
        debug_assert!(treasury.reconciles());

        let enrollment = slot
            .insert(Enrollment::new(learner.id(), course.id))
            .value()
            .clone();
        let transaction = self.transactions.append(RecordDraft::course_purchase(
            learner.id(),
            course.id,
            course.price,
            receipt.transaction_id.clone(),
            &course.title,
        ));
        let payout = match self.config.monetization {
            Monetization::PerSale => Some(self.transactions.append(RecordDraft::sale_payout(
                course.instructor,
                course.id,
                course.instructor_payout,
                transaction.id,
                &course.title,
            ))),
            Monetization::UploadLumpSum => None,
        };

        Ok(PurchaseOutcome {
            enrollment,
            transaction,
            payout,
            bank_reference: receipt.transaction_id,
        })
    }

    /// Collects the pending payout `record_id` addressed to `caller`.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::Forbidden`] - caller is not an instructor.
    /// - [`SettlementError::NotFound`] - no pending payout with that id for this caller.
    /// - [`SettlementError::Validation`] - the sale behind the payout has no valid receipt.
    /// - [`SettlementError::InsufficientFunds`] - treasury cannot fund the payout.
    pub fn collect_payout(
        &self,
        caller: Caller,
        record_id: RecordId,
    ) -> Result<PayoutOutcome, SettlementError> {
        require_role(caller, Role::Instructor)?;
        let instructor = self.user(caller.id)?;

        let outcome = self
            .settle_payout(&instructor, record_id)
            .inspect_err(|error| {
                tracing::warn!(instructor = %caller.id, record = %record_id, %error, "payout collection aborted");
            })?;

        tracing::info!(
            instructor = %caller.id,
            record = %record_id,
            amount = %outcome.payout_amount,
            "payout collected"
        );
        Ok(outcome)
    }

    fn settle_payout(
        &self,
        instructor: &User,
        record_id: RecordId,
    ) -> Result<PayoutOutcome, SettlementError> {
        let pending = self
            .transactions
            .get(record_id)
            .filter(|record| record.is_pending_payout_for(instructor.id()))
            .ok_or(SettlementError::NotFound(Entity::PendingPayout))?;

        let reference = self.settling_reference(&pending)?;
        self.bank
            .validate(&reference)
            .map_err(|_| SettlementError::Validation)?;

        let mut instructor_account = instructor.lock_account();
        let mut treasury = self.treasury.lock();
        // Re-read under the locks: a concurrent collection may have won.
        let mut record = self
            .transactions
            .get_mut(record_id)
            .filter(|record| record.is_pending_payout_for(instructor.id()))
            .ok_or(SettlementError::NotFound(Entity::PendingPayout))?;

        let amount = record.amount;
        let mut instructor_next = instructor_account.clone();
        let mut treasury_next = treasury.clone();
        let mut record_next = record.value().clone();

        let receipt = self
            .bank
            .payout(&mut treasury_next.account, &mut instructor_next, amount)?;
        treasury_next.record_payout(amount);
        record_next.complete(receipt.transaction_id)?;

        // Commit.
        *instructor_account = instructor_next;
        *treasury = treasury_next;
        *record = record_next;
        debug_assert!(treasury.reconciles());

        Ok(PayoutOutcome {
            transaction: record.value().clone(),
            payout_amount: amount,
            new_balance: instructor_account.balance(),
        })
    }

    /// Reference that proves the money behind a pending payout arrived.
    ///
    /// A sale payout carries no reference of its own until collected, so the
    /// receipt of the purchase it stems from is used.
    fn settling_reference(
        &self,
        record: &TransactionRecord,
    ) -> Result<BankReference, SettlementError> {
        if let Some(reference) = &record.bank_reference {
            return Ok(reference.clone());
        }
        record
            .origin
            .and_then(|origin| self.transactions.get(origin))
            .and_then(|purchase| purchase.bank_reference)
            .ok_or(SettlementError::Validation)
    }

    pub fn list_pending_payouts(&self, caller: Caller) -> Result<PendingPayouts, SettlementError> {
        require_role(caller, Role::Instructor)?;
        let pending_payouts = self.transactions.pending_payouts_for(caller.id);
        let total_pending = pending_payouts.iter().map(|record| record.amount).sum();
        Ok(PendingPayouts {
            pending_payouts,
            total_pending,
        })
    }

    /// Every record where the user pays or is paid, newest first.
    pub fn transactions_for(&self, user_id: UserId) -> Result<Vec<TransactionRecord>, SettlementError> {
        self.user(user_id)?;
        Ok(self.transactions.involving(user_id))
    }

    pub fn organization_stats(&self, caller: Caller) -> Result<OrganizationStats, SettlementError> {
        require_role(caller, Role::Admin)?;
        let count_role = |role: Role| self.users.iter().filter(|u| u.role() == role).count();
        let treasury = self.treasury.snapshot();

        Ok(OrganizationStats {
            total_instructors: count_role(Role::Instructor),
            total_learners: count_role(Role::Learner),
            total_courses: self.courses.len(),
            total_transactions: self.transactions.len(),
            total_revenue: treasury.total_revenue,
            total_payouts: treasury.total_payouts,
            current_balance: treasury.balance,
            recent_transactions: self.transactions.recent(RECENT_TRANSACTIONS),
        })
    }

    // === Enrollment and completion ===

    pub fn enrollment(&self, learner_id: UserId, course_id: CourseId) -> Option<Enrollment> {
        self.enrollments.get(learner_id, course_id)
    }

    pub fn enrollments_for(&self, learner_id: UserId) -> Vec<Enrollment> {
        self.enrollments.for_learner(learner_id)
    }

    /// Sets progress, clamped to `0..=100`; reaching 100 completes the course.
    pub fn update_progress(
        &self,
        learner_id: UserId,
        course_id: CourseId,
        progress: i64,
    ) -> Result<Enrollment, SettlementError> {
        self.enrollments
            .update_progress(learner_id, course_id, progress)
    }

    /// Issues, or returns the already issued, certificate for a completed course.
    ///
    /// # Errors
    ///
    /// [`SettlementError::NotFound`] unless the learner has completed the course.
    pub fn issue_certificate(
        &self,
        learner_id: UserId,
        course_id: CourseId,
    ) -> Result<Certificate, SettlementError> {
        self.enrollments
            .get(learner_id, course_id)
            .filter(|enrollment| enrollment.completed)
            .ok_or(SettlementError::NotFound(Entity::Enrollment))?;
        Ok(self.certificates.issue(
            learner_id,
            course_id,
            &self.config.certificate_base_url,
        ))
    }

    pub fn verify_certificate(&self, certificate_id: Uuid) -> Result<Certificate, SettlementError> {
        self.certificates.verify(certificate_id)
    }

    pub fn certificates_for(&self, learner_id: UserId) -> Vec<Certificate> {
        self.certificates.for_learner(learner_id)
    }

    fn user(&self, id: UserId) -> Result<Ref<'_, UserId, User>, SettlementError> {
        self.users
            .get(&id)
            .ok_or(SettlementError::NotFound(Entity::User))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn require_role(caller: Caller, role: Role) -> Result<(), SettlementError> {
    if caller.role == role {
        Ok(())
    } else {
        Err(SettlementError::Forbidden { role: caller.role })
    }
}
