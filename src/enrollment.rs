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

//! Enrollments: a learner's access right to a course, plus progress.
//!
//! An enrollment only ever comes into existence inside a committed purchase.
//! The (learner, course) pair is unique at the storage level: the purchase
//! claims a vacant slot through the map's entry API, so two racing purchases
//! of the same course cannot both succeed.

use crate::base::{CourseId, UserId};
use crate::error::{Entity, SettlementError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::{Entry, VacantEntry};
use serde::Serialize;

pub const MAX_PROGRESS: u8 = 100;

//  enrolled (progress 0) ──update──► in progress ──reaches 100──► completed
//                                                                 (terminal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub learner: UserId,
    pub course: CourseId,
    pub progress: u8,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(learner: UserId, course: CourseId) -> Self {
        Self {
            learner,
            course,
            progress: 0,
            completed: false,
            completed_at: None,
            enrolled_at: Utc::now(),
        }
    }

    /// Stores `progress` clamped to `0..=100`.
    ///
    /// Reaching 100 completes the enrollment and stamps `completed_at` once.
    /// A completed enrollment is frozen and further updates are ignored.
    /// Returns `true` only for the call that completed it.
    pub fn update_progress(&mut self, progress: i64) -> bool {
        if self.completed {
            return false;
        }
        let clamped = progress.clamp(0, i64::from(MAX_PROGRESS));
        // Lossless: clamped into u8 range above.
        self.progress = clamped as u8;

        if self.progress == MAX_PROGRESS {
            self.completed = true;
            self.completed_at = Some(Utc::now());
            return true;
        }
        false
    }
}

type EnrollmentKey = (UserId, CourseId);

/// Enrollments keyed by (learner, course).
#[derive(Debug, Default)]
pub struct Enrollments {
    entries: DashMap<EnrollmentKey, Enrollment>,
}

impl Enrollments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for (learner, course).
    ///
    /// The returned entry holds the shard lock until it is filled or dropped;
    /// dropping it leaves no enrollment behind.
    ///
    /// # Errors
    ///
    /// [`SettlementError::AlreadyEnrolled`] if the pair already exists.
    pub(crate) fn reserve(
        &self,
        learner: UserId,
        course: CourseId,
    ) -> Result<VacantEntry<'_, EnrollmentKey, Enrollment>, SettlementError> {
        match self.entries.entry((learner, course)) {
            Entry::Occupied(_) => Err(SettlementError::AlreadyEnrolled),
            Entry::Vacant(entry) => Ok(entry),
        }
    }

    pub fn get(&self, learner: UserId, course: CourseId) -> Option<Enrollment> {
        self.entries
            .get(&(learner, course))
            .map(|enrollment| enrollment.clone())
    }

    pub fn contains(&self, learner: UserId, course: CourseId) -> bool {
        self.entries.contains_key(&(learner, course))
    }

    /// # Errors
    ///
    /// [`SettlementError::NotFound`] if the learner is not enrolled.
    pub fn update_progress(
        &self,
        learner: UserId,
        course: CourseId,
        progress: i64,
    ) -> Result<Enrollment, SettlementError> {
        let mut enrollment = self
            .entries
            .get_mut(&(learner, course))
            .ok_or(SettlementError::NotFound(Entity::Enrollment))?;

        if enrollment.update_progress(progress) {
            tracing::info!(%learner, %course, "course completed");
        }
        Ok(enrollment.clone())
    }

    /// Enrollments of one learner, most recent first.
    pub fn for_learner(&self, learner: UserId) -> Vec<Enrollment> {
        let mut enrollments: Vec<Enrollment> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == learner)
            .map(|entry| entry.value().clone())
            .collect();
        enrollments.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        enrollments
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment() -> Enrollment {
        Enrollment::new(UserId(1), CourseId(1))
    }

    #[test]
    fn progress_is_clamped() {
        let mut e = enrollment();
        e.update_progress(-10);
        assert_eq!(e.progress, 0);
        assert!(!e.completed);

        e.update_progress(42);
        assert_eq!(e.progress, 42);
    }

    #[test]
    fn overshoot_completes_exactly_once() {
        let mut e = enrollment();
        assert!(e.update_progress(150));
        assert_eq!(e.progress, 100);
        assert!(e.completed);
        let stamped = e.completed_at;
        assert!(stamped.is_some());

        assert!(!e.update_progress(100));
        assert_eq!(e.completed_at, stamped);
    }

    #[test]
    fn completion_is_never_reset() {
        let mut e = enrollment();
        e.update_progress(100);
        e.update_progress(10);
        assert!(e.completed);
        assert_eq!(e.progress, 100);
    }

    #[test]
    fn reserve_rejects_occupied_slot() {
        let store = Enrollments::new();
        store
            .reserve(UserId(1), CourseId(1))
            .unwrap()
            .insert(enrollment());

        let second = store.reserve(UserId(1), CourseId(1));
        assert!(matches!(second, Err(SettlementError::AlreadyEnrolled)));
        assert!(store.reserve(UserId(1), CourseId(2)).is_ok());
    }

    #[test]
    fn dropped_reservation_leaves_nothing() {
        let store = Enrollments::new();
        drop(store.reserve(UserId(1), CourseId(1)).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn update_progress_requires_enrollment() {
        let store = Enrollments::new();
        let result = store.update_progress(UserId(1), CourseId(1), 50);
        assert_eq!(result, Err(SettlementError::NotFound(Entity::Enrollment)));
    }
}
