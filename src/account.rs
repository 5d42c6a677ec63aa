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

//! Bank account embedded in every account-bearing entity.
//!
//! There is no standalone ledger table: a [`BankAccount`] lives inside the
//! [`User`](crate::User) or [`Treasury`](crate::Treasury) that owns it, and its
//! balance is the source of truth. Balances never go negative; a debit that
//! would overdraw is rejected before anything changes.
//!
//! # Example
//!
//! ```
//! use lms_settlement::BankAccount;
//! use rust_decimal_macros::dec;
//!
//! let account = BankAccount::new("ACC1", Some("s3cret".into()), dec!(100));
//! assert_eq!(account.balance(), dec!(100));
//! assert!(account.matches_secret("s3cret"));
//! ```

use crate::SettlementError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use std::fmt;

/// Number of decimal places balances are rounded to when reported.
pub const DECIMAL_PRECISION: u32 = 4;

#[derive(Clone)]
pub struct BankAccount {
    account_number: String,
    /// Shared secret authorizing debits. The treasury has none.
    secret_key: Option<String>,
    balance: Decimal,
    updated_at: DateTime<Utc>,
}

impl BankAccount {
    pub fn new(
        account_number: impl Into<String>,
        secret_key: Option<String>,
        balance: Decimal,
    ) -> Self {
        Self {
            account_number: account_number.into(),
            secret_key,
            balance,
            updated_at: Utc::now(),
        }
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn has_secret(&self) -> bool {
        self.secret_key.is_some()
    }

    pub(crate) fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    /// Returns `true` only if a secret is configured and equals `candidate`.
    pub fn matches_secret(&self, candidate: &str) -> bool {
        self.secret_key.as_deref() == Some(candidate)
    }

    /// Replaces the account number and secret, keeping the balance.
    pub(crate) fn set_credentials(&mut self, account_number: String, secret_key: String) {
        self.account_number = account_number;
        self.secret_key = Some(secret_key);
        self.updated_at = Utc::now();
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    /// Increases the balance.
    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        self.balance += amount;
        self.updated_at = Utc::now();
        self.assert_invariants();
        Ok(())
    }

    /// Decreases the balance.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(SettlementError::InsufficientFunds);
        }
        self.balance -= amount;
        self.updated_at = Utc::now();
        self.assert_invariants();
        Ok(())
    }

    pub fn snapshot(&self) -> Balance {
        Balance {
            account_number: self.account_number.clone(),
            balance: self.balance.round_dp(DECIMAL_PRECISION),
            last_updated: self.updated_at,
        }
    }
}

// Hand-written so the secret never reaches logs.
impl fmt::Debug for BankAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankAccount")
            .field("account_number", &self.account_number)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("balance", &self.balance)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Serialize for BankAccount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("BankAccount", 2)?;
        state.serialize_field("accountNumber", &self.account_number)?;
        state.serialize_field("balance", &self.balance.round_dp(DECIMAL_PRECISION))?;
        state.end()
    }
}

/// Point-in-time view of an account, as returned by `get_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub account_number: String,
    pub balance: Decimal,
    pub last_updated: DateTime<Utc>,
}
