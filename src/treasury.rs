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

//! The platform treasury.
//!
//! A singleton organization that receives every course payment and funds every
//! instructor payout. Besides its [`BankAccount`] it keeps running totals, and
//! after any committed settlement:
//!
//! `balance == opening_balance + total_revenue - total_payouts`

use crate::account::{BankAccount, DECIMAL_PRECISION};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone)]
pub(crate) struct TreasuryData {
    pub(crate) name: String,
    pub(crate) account: BankAccount,
    opening_balance: Decimal,
    pub(crate) total_revenue: Decimal,
    pub(crate) total_payouts: Decimal,
}

impl TreasuryData {
    fn new(name: String, account: BankAccount) -> Self {
        Self {
            name,
            opening_balance: account.balance(),
            account,
            total_revenue: Decimal::ZERO,
            total_payouts: Decimal::ZERO,
        }
    }

    pub(crate) fn record_revenue(&mut self, amount: Decimal) {
        self.total_revenue += amount;
    }

    pub(crate) fn record_payout(&mut self, amount: Decimal) {
        self.total_payouts += amount;
    }

    pub(crate) fn reconciles(&self) -> bool {
        self.account.balance() == self.opening_balance + self.total_revenue - self.total_payouts
    }

    fn snapshot(&self) -> OrganizationBalance {
        let round = |d: Decimal| d.round_dp(DECIMAL_PRECISION);
        OrganizationBalance {
            organization: self.name.clone(),
            account_number: self.account.account_number().to_owned(),
            balance: round(self.account.balance()),
            total_revenue: round(self.total_revenue),
            total_payouts: round(self.total_payouts),
            net_balance: round(self.total_revenue - self.total_payouts),
            last_updated: self.account.updated_at(),
        }
    }
}

/// Mutex-guarded treasury state.
///
/// Every workflow that moves treasury money holds this lock for its whole unit
/// of work, which serializes updates to the balance and both running totals.
#[derive(Debug)]
pub struct Treasury {
    inner: Mutex<TreasuryData>,
}

impl Treasury {
    pub fn new(name: impl Into<String>, account: BankAccount) -> Self {
        Self {
            inner: Mutex::new(TreasuryData::new(name.into(), account)),
        }
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().account.balance()
    }

    pub fn total_revenue(&self) -> Decimal {
        self.inner.lock().total_revenue
    }

    pub fn total_payouts(&self) -> Decimal {
        self.inner.lock().total_payouts
    }

    /// Returns `true` when the balance matches opening balance plus revenue minus payouts.
    pub fn reconciles(&self) -> bool {
        self.inner.lock().reconciles()
    }

    pub fn snapshot(&self) -> OrganizationBalance {
        self.inner.lock().snapshot()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TreasuryData> {
        self.inner.lock()
    }
}

/// Treasury view returned by `get_organization_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationBalance {
    pub organization: String,
    pub account_number: String,
    pub balance: Decimal,
    pub total_revenue: Decimal,
    pub total_payouts: Decimal,
    /// `total_revenue - total_payouts`
    pub net_balance: Decimal,
    pub last_updated: DateTime<Utc>,
}
