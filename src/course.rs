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

//! Course read model consumed by settlement.

use crate::base::{CourseId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A published course.
///
/// `instructor_payout` is what the instructor earns, either per sale or once at
/// publication depending on [`Monetization`](crate::Monetization). It is fixed
/// when the course is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub instructor: UserId,
    pub price: Decimal,
    pub instructor_payout: Decimal,
}

/// Input for publishing a course.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCourse {
    pub title: String,
    pub price: Decimal,
}

impl NewCourse {
    pub fn new(title: impl Into<String>, price: Decimal) -> Self {
        Self {
            title: title.into(),
            price,
        }
    }
}
