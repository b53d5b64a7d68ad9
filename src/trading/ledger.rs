//! Session balance ledger.
//!
//! Single source of truth for a session's spendable SOL. Every mutation is
//! appended to a transaction log carrying before/after balances. The ledger
//! is shared as `Arc<tokio::sync::Mutex<BalanceLedger>>` and callers must
//! never hold the lock across a network call.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::LedgerError;

/// Kind of balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Deposit,
    Withdrawal,
    /// Balance reserved for a copy trade
    Debit,
    /// Proceeds returned from a position close
    Credit,
}

/// One movement in the transaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub kind: LedgerEntryKind,
    pub amount_sol: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

/// Spendable balance plus its append-only movement log.
#[derive(Debug)]
pub struct BalanceLedger {
    balance: Decimal,
    starting_balance: Decimal,
    entries: Vec<LedgerEntry>,
}

impl BalanceLedger {
    /// Open a ledger with an initial deposit.
    pub fn new(initial_balance: Decimal) -> Self {
        let mut ledger = Self {
            balance: Decimal::ZERO,
            starting_balance: initial_balance,
            entries: Vec::new(),
        };
        ledger.record(LedgerEntryKind::Deposit, initial_balance, "Initial balance");
        ledger
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn starting_balance(&self) -> Decimal {
        self.starting_balance
    }

    /// Realized PnL: balance movement since the initial deposit.
    pub fn total_pnl(&self) -> Decimal {
        self.balance - self.starting_balance
    }

    /// Reserve `amount` for a trade. Rejected if it would take the balance
    /// negative; on rejection the balance is unchanged.
    pub fn debit(
        &mut self,
        amount: Decimal,
        note: impl Into<String>,
    ) -> Result<&LedgerEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        if amount > self.balance {
            return Err(LedgerError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }

        let entry = self.record(LedgerEntryKind::Debit, amount, note);
        debug!(
            amount = %entry.amount_sol,
            balance = %entry.balance_after,
            "Ledger debit"
        );
        Ok(entry)
    }

    /// Return proceeds to the balance.
    pub fn credit(
        &mut self,
        amount: Decimal,
        note: impl Into<String>,
    ) -> Result<&LedgerEntry, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let entry = self.record(LedgerEntryKind::Credit, amount, note);
        debug!(
            amount = %entry.amount_sol,
            balance = %entry.balance_after,
            "Ledger credit"
        );
        Ok(entry)
    }

    /// Add funds to the session.
    pub fn deposit(&mut self, amount: Decimal, note: impl Into<String>) -> Result<&LedgerEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        Ok(self.record(LedgerEntryKind::Deposit, amount, note))
    }

    /// Remove funds from the session; rejected below zero like a debit.
    pub fn withdraw(&mut self, amount: Decimal, note: impl Into<String>) -> Result<&LedgerEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        if amount > self.balance {
            return Err(LedgerError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        Ok(self.record(LedgerEntryKind::Withdrawal, amount, note))
    }

    /// Movement log, oldest first.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    fn record(
        &mut self,
        kind: LedgerEntryKind,
        amount: Decimal,
        note: impl Into<String>,
    ) -> &LedgerEntry {
        let balance_before = self.balance;
        self.balance = match kind {
            LedgerEntryKind::Deposit | LedgerEntryKind::Credit => self.balance + amount,
            LedgerEntryKind::Withdrawal | LedgerEntryKind::Debit => self.balance - amount,
        };

        self.entries.push(LedgerEntry {
            id: Uuid::new_v4(),
            kind,
            amount_sol: amount,
            balance_before,
            balance_after: self.balance,
            timestamp: Utc::now(),
            note: note.into(),
        });

        self.entries.last().expect("entry just pushed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn debit_below_zero_is_rejected_and_balance_unchanged() {
        let mut ledger = BalanceLedger::new(dec!(1.0));

        let err = ledger.debit(dec!(1.5), "too big").unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(), dec!(1.0));

        // Exactly the full balance is allowed
        ledger.debit(dec!(1.0), "all in").unwrap();
        assert_eq!(ledger.balance(), Decimal::ZERO);
    }

    #[test]
    fn balance_is_never_negative_across_sequences() {
        let mut ledger = BalanceLedger::new(dec!(10.0));

        let ops: Vec<(bool, Decimal)> = vec![
            (true, dec!(4.0)),
            (false, dec!(1.5)),
            (true, dec!(8.0)), // rejected: only 7.5 available
            (true, dec!(7.5)),
            (false, dec!(0.3)),
        ];

        for (is_debit, amount) in ops {
            if is_debit {
                let _ = ledger.debit(amount, "op");
            } else {
                ledger.credit(amount, "op").unwrap();
            }
            assert!(ledger.balance() >= Decimal::ZERO);
        }
    }

    #[test]
    fn entries_carry_consistent_before_after() {
        let mut ledger = BalanceLedger::new(dec!(5.0));
        ledger.debit(dec!(2.0), "trade").unwrap();
        ledger.credit(dec!(2.4), "close").unwrap();

        let entries = ledger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, LedgerEntryKind::Deposit);
        assert_eq!(entries[0].note, "Initial balance");
        for window in entries.windows(2) {
            assert_ne!(window[0].id, window[1].id);
            assert!(window[0].timestamp <= window[1].timestamp);
            assert_eq!(window[0].balance_after, window[1].balance_before);
        }
        assert_eq!(entries.last().unwrap().balance_after, ledger.balance());
        assert_eq!(ledger.total_pnl(), dec!(0.4));
    }

    #[test]
    fn deposits_and_withdrawals_move_the_balance() {
        let mut ledger = BalanceLedger::new(dec!(5.0));

        ledger.deposit(dec!(2.0), "top up").unwrap();
        assert_eq!(ledger.balance(), dec!(7.0));

        ledger.withdraw(dec!(3.0), "cash out").unwrap();
        assert_eq!(ledger.balance(), dec!(4.0));

        assert!(matches!(
            ledger.withdraw(dec!(100.0), "too much"),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let mut ledger = BalanceLedger::new(dec!(1.0));

        assert!(matches!(
            ledger.debit(Decimal::ZERO, "zero"),
            Err(LedgerError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            ledger.debit(dec!(-0.5), "negative"),
            Err(LedgerError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            ledger.withdraw(dec!(-1), "negative"),
            Err(LedgerError::NonPositiveAmount(_))
        ));
    }
}
