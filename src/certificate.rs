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

//! Completion certificates.
//!
//! At most one certificate exists per (learner, course). Issuing again returns
//! the certificate already on file.

use crate::base::{CourseId, UserId};
use crate::error::{Entity, SettlementError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub certificate_id: Uuid,
    pub learner: UserId,
    pub course: CourseId,
    pub issue_date: DateTime<Utc>,
    pub verification_url: String,
}

#[derive(Debug, Default)]
pub struct Certificates {
    by_enrollment: DashMap<(UserId, CourseId), Certificate>,
    by_id: DashMap<Uuid, (UserId, CourseId)>,
}

impl Certificates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing certificate or mints one under `base_url`.
    ///
    /// The caller must already have checked that the enrollment is completed.
    pub(crate) fn issue(&self, learner: UserId, course: CourseId, base_url: &str) -> Certificate {
        self.by_enrollment
            .entry((learner, course))
            .or_insert_with(|| {
                let certificate_id = Uuid::new_v4();
                self.by_id.insert(certificate_id, (learner, course));
                tracing::info!(%learner, %course, %certificate_id, "certificate issued");
                Certificate {
                    certificate_id,
                    learner,
                    course,
                    issue_date: Utc::now(),
                    verification_url: format!(
                        "{}/certificates/verify/{certificate_id}",
                        base_url.trim_end_matches('/')
                    ),
                }
            })
            .clone()
    }

    /// # Errors
    ///
    /// [`SettlementError::NotFound`] for an unknown certificate id.
    pub fn verify(&self, certificate_id: Uuid) -> Result<Certificate, SettlementError> {
        let key = *self
            .by_id
            .get(&certificate_id)
            .ok_or(SettlementError::NotFound(Entity::Certificate))?;
        self.by_enrollment
            .get(&key)
            .map(|certificate| certificate.clone())
            .ok_or(SettlementError::NotFound(Entity::Certificate))
    }

    pub fn for_learner(&self, learner: UserId) -> Vec<Certificate> {
        self.by_enrollment
            .iter()
            .filter(|entry| entry.key().0 == learner)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_issue_returns_same_certificate() {
        let certificates = Certificates::new();
        let first = certificates.issue(UserId(1), CourseId(2), "http://lms.test/");
        let second = certificates.issue(UserId(1), CourseId(2), "http://lms.test/");

        assert_eq!(first, second);
        assert_eq!(
            first.verification_url,
            format!("http://lms.test/certificates/verify/{}", first.certificate_id)
        );
        assert_eq!(certificates.for_learner(UserId(1)).len(), 1);
    }

    #[test]
    fn verify_unknown_id_fails() {
        let certificates = Certificates::new();
        let result = certificates.verify(Uuid::new_v4());
        assert_eq!(result, Err(SettlementError::NotFound(Entity::Certificate)));
    }

    #[test]
    fn verify_known_id_returns_certificate() {
        let certificates = Certificates::new();
        let issued = certificates.issue(UserId(1), CourseId(2), "http://lms.test");
        assert_eq!(certificates.verify(issued.certificate_id), Ok(issued));
    }
}
