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

//! Platform users and their embedded bank account.

use crate::account::{Balance, BankAccount};
use crate::base::{Role, UserId};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;

/// A learner, instructor or admin.
///
/// The account sits behind its own mutex so that settlement of one user never
/// blocks another; only the treasury is shared between workflows.
#[derive(Debug)]
pub struct User {
    id: UserId,
    name: String,
    role: Role,
    account: Mutex<BankAccount>,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>, role: Role, account: BankAccount) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            account: Mutex::new(account),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn balance(&self) -> Decimal {
        self.account.lock().balance()
    }

    pub fn account_number(&self) -> String {
        self.account.lock().account_number().to_owned()
    }

    pub fn snapshot(&self) -> Balance {
        self.account.lock().snapshot()
    }

    /// Locks the account for the duration of a settlement.
    pub(crate) fn lock_account(&self) -> MutexGuard<'_, BankAccount> {
        self.account.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn snapshot_reflects_locked_mutation() {
        let user = User::new(
            UserId(1),
            "Ada",
            Role::Learner,
            BankAccount::new("ACC1", Some("k".into()), dec!(10)),
        );
        user.lock_account().credit(dec!(5)).unwrap();

        assert_eq!(user.balance(), dec!(15));
        assert_eq!(user.snapshot().account_number, "ACC1");
        assert_eq!(user.role(), Role::Learner);
        assert_eq!(user.name(), "Ada");
    }
}
