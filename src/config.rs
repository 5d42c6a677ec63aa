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

//! Engine configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// How instructors are paid for their courses.
///
/// Exactly one model is active for a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Monetization {
    /// Every sale leaves a pending payout the instructor collects later.
    #[default]
    PerSale,
    /// The instructor is paid once, immediately, when the course is published.
    UploadLumpSum,
}

impl FromStr for Monetization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-sale" => Ok(Monetization::PerSale),
            "upload-lump-sum" => Ok(Monetization::UploadLumpSum),
            other => Err(format!(
                "unknown monetization model '{other}' (expected per-sale or upload-lump-sum)"
            )),
        }
    }
}

impl fmt::Display for Monetization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Monetization::PerSale => f.write_str("per-sale"),
            Monetization::UploadLumpSum => f.write_str("upload-lump-sum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub treasury_name: String,
    pub treasury_account_number: String,
    pub treasury_opening_balance: Decimal,
    /// Opening balance for users registered without an explicit one.
    pub default_user_balance: Decimal,
    /// Fraction of the course price owed to the instructor.
    pub instructor_share: Decimal,
    pub monetization: Monetization,
    pub certificate_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            treasury_name: "LearnPro LMS".to_owned(),
            treasury_account_number: "LMS001".to_owned(),
            treasury_opening_balance: dec!(1000000),
            default_user_balance: dec!(10000),
            instructor_share: dec!(0.7),
            monetization: Monetization::PerSale,
            certificate_base_url: "http://localhost:3000".to_owned(),
        }
    }
}

impl Config {
    /// Rejects values the field types cannot rule out.
    ///
    /// # Errors
    ///
    /// A message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.instructor_share <= Decimal::ZERO || self.instructor_share > Decimal::ONE {
            return Err(format!(
                "instructor share {} must be greater than 0 and at most 1",
                self.instructor_share
            ));
        }
        if self.treasury_opening_balance < Decimal::ZERO {
            return Err("treasury opening balance must not be negative".to_owned());
        }
        if self.default_user_balance < Decimal::ZERO {
            return Err("default user balance must not be negative".to_owned());
        }
        Ok(())
    }
}
