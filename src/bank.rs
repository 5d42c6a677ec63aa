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

//! Simulated bank: account-to-account transfers and their receipts.
//!
//! The [`Bank`] knows nothing about courses or enrollment. It moves value
//! between two [`BankAccount`]s, checks authorization and sufficiency first,
//! and keeps every receipt it mints so the reference can be validated later.
//!
//! Mutations land directly on the accounts passed in; persisting them is the
//! caller's job.
//!
//! [`Bank::validate`] only recognises receipts this same instance issued. It is
//! a self-consistency stub, not a verification against a real payment rail,
//! and can never catch a forged reference minted elsewhere.

use crate::account::BankAccount;
use crate::base::BankReference;
use crate::error::{Entity, SettlementError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const TRANSFER_PREFIX: &str = "TXN";
const PAYOUT_PREFIX: &str = "PAY";

/// Proof of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_id: BankReference,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    /// Payer balance right after the transfer.
    pub new_balance: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Transfer service holding the receipts it has issued.
///
/// Constructed once at startup and shared by reference with the
/// [`Engine`](crate::Engine).
#[derive(Debug, Default)]
pub struct Bank {
    receipts: DashMap<BankReference, Receipt>,
    sequence: AtomicU64,
}

impl Bank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `amount` from `from` to `to`.
    ///
    /// When `required_secret` is given it must match the payer's secret.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::InvalidAmount`] - `amount` is zero or negative.
    /// - [`SettlementError::Authorization`] - secret supplied and does not match.
    /// - [`SettlementError::InsufficientFunds`] - payer balance below `amount`.
    ///
    /// Neither account is touched when an error is returned.
    pub fn transfer(
        &self,
        from: &mut BankAccount,
        to: &mut BankAccount,
        amount: Decimal,
        required_secret: Option<&str>,
    ) -> Result<Receipt, SettlementError> {
        match required_secret {
            Some(secret) if !from.matches_secret(secret) => {
                return Err(SettlementError::Authorization);
            }
            _ => {}
        }
        self.settle(from, to, amount, TRANSFER_PREFIX)
    }

    /// System-initiated transfer out of the treasury; no secret is checked.
    pub fn payout(
        &self,
        from: &mut BankAccount,
        to: &mut BankAccount,
        amount: Decimal,
    ) -> Result<Receipt, SettlementError> {
        self.settle(from, to, amount, PAYOUT_PREFIX)
    }

    /// Looks up a receipt this bank issued.
    ///
    /// # Errors
    ///
    /// [`SettlementError::NotFound`] if the reference is unknown.
    pub fn validate(&self, reference: &BankReference) -> Result<Receipt, SettlementError> {
        self.receipts
            .get(reference)
            .map(|receipt| receipt.clone())
            .ok_or(SettlementError::NotFound(Entity::Receipt))
    }

    /// Number of receipts issued so far.
    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    fn settle(
        &self,
        from: &mut BankAccount,
        to: &mut BankAccount,
        amount: Decimal,
        prefix: &str,
    ) -> Result<Receipt, SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        if from.balance() < amount {
            return Err(SettlementError::InsufficientFunds);
        }

        from.debit(amount)?;
        to.credit(amount)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let receipt = Receipt {
            transaction_id: BankReference(format!("{prefix}{sequence:010}")),
            from: from.account_number().to_owned(),
            to: to.account_number().to_owned(),
            amount,
            new_balance: from.balance(),
            timestamp: Utc::now(),
        };
        self.receipts
            .insert(receipt.transaction_id.clone(), receipt.clone());

        tracing::debug!(
            reference = %receipt.transaction_id,
            from = %receipt.from,
            to = %receipt.to,
            %amount,
            "bank transfer settled"
        );
        Ok(receipt)
    }
}
