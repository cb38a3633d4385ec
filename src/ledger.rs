// 9.1 ledger.rs: settlement-asset ledger and fee sink. the engine never holds the quote asset
// itself: margin deposits burn it, withdrawals and keeper rewards issue it, fees go to the sink.
// the in-memory ledger is MOCKED bookkeeping, no real token transfers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{AccountId, Quote};

/// One ledger movement. the engine stages these and hands them over as a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerInstruction {
    Issue { account: AccountId, amount: Quote },
    Burn { account: AccountId, amount: Quote },
    PayFee { amount: Quote, tracking_code: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance for {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        requested: Quote,
        available: Quote,
    },

    #[error("negative ledger amount {0}")]
    NegativeAmount(Quote),

    #[error("ledger unavailable")]
    Unavailable,
}

pub trait SettlementLedger: Send + Sync {
    /// Apply every instruction or none of them.
    fn settle(&self, batch: &[LedgerInstruction]) -> Result<(), LedgerError>;

    fn balance(&self, account: AccountId) -> Quote;

    fn issue(&self, account: AccountId, amount: Quote) -> Result<(), LedgerError> {
        self.settle(&[LedgerInstruction::Issue { account, amount }])
    }

    fn burn(&self, account: AccountId, amount: Quote) -> Result<(), LedgerError> {
        self.settle(&[LedgerInstruction::Burn { account, amount }])
    }

    fn pay_fee(&self, amount: Quote, tracking_code: Option<&str>) -> Result<(), LedgerError> {
        self.settle(&[LedgerInstruction::PayFee {
            amount,
            tracking_code: tracking_code.map(str::to_string),
        }])
    }
}

#[derive(Debug, Default, Clone)]
struct Book {
    balances: HashMap<AccountId, Quote>,
    fee_pool: Quote,
    fees_by_tracking_code: HashMap<String, Quote>,
    total_issued: Quote,
    total_burned: Quote,
}

impl Book {
    fn apply(&mut self, instruction: &LedgerInstruction) -> Result<(), LedgerError> {
        match instruction {
            LedgerInstruction::Issue { account, amount } => {
                check_amount(*amount)?;
                let balance = self.balances.entry(*account).or_default();
                *balance = balance.add(*amount);
                self.total_issued = self.total_issued.add(*amount);
            }
            LedgerInstruction::Burn { account, amount } => {
                check_amount(*amount)?;
                let available = self.balances.get(account).copied().unwrap_or_default();
                if *amount > available {
                    return Err(LedgerError::InsufficientBalance {
                        account: *account,
                        requested: *amount,
                        available,
                    });
                }
                self.balances.insert(*account, available.sub(*amount));
                self.total_burned = self.total_burned.add(*amount);
            }
            LedgerInstruction::PayFee { amount, tracking_code } => {
                check_amount(*amount)?;
                self.fee_pool = self.fee_pool.add(*amount);
                if let Some(code) = tracking_code {
                    let total = self.fees_by_tracking_code.entry(code.clone()).or_default();
                    *total = total.add(*amount);
                }
            }
        }
        Ok(())
    }
}

fn check_amount(amount: Quote) -> Result<(), LedgerError> {
    if amount.is_negative() {
        return Err(LedgerError::NegativeAmount(amount));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    book: Mutex<Book>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an account from outside the market (a wallet top-up in the simulator and tests).
    pub fn credit(&self, account: AccountId, amount: Quote) {
        if let Ok(mut book) = self.book.lock() {
            let balance = book.balances.entry(account).or_default();
            *balance = balance.add(amount);
        }
    }

    pub fn fee_pool(&self) -> Quote {
        self.book.lock().map(|b| b.fee_pool).unwrap_or_default()
    }

    pub fn fees_for_tracking_code(&self, code: &str) -> Quote {
        self.book
            .lock()
            .ok()
            .and_then(|b| b.fees_by_tracking_code.get(code).copied())
            .unwrap_or_default()
    }

    /// Net quote asset created by the market: issued minus burned.
    pub fn net_issued(&self) -> Quote {
        self.book
            .lock()
            .map(|b| b.total_issued.sub(b.total_burned))
            .unwrap_or_default()
    }
}

impl SettlementLedger for InMemoryLedger {
    fn settle(&self, batch: &[LedgerInstruction]) -> Result<(), LedgerError> {
        let mut book = self.book.lock().map_err(|_| LedgerError::Unavailable)?;
        // apply to a scratch copy so a failing instruction leaves the book untouched
        let mut staged = book.clone();
        for instruction in batch {
            staged.apply(instruction)?;
        }
        *book = staged;
        Ok(())
    }

    fn balance(&self, account: AccountId) -> Quote {
        self.book
            .lock()
            .ok()
            .and_then(|b| b.balances.get(&account).copied())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn issue_and_burn() {
        let ledger = InMemoryLedger::new();
        ledger.issue(AccountId(1), Quote::new(dec!(100))).unwrap();
        ledger.burn(AccountId(1), Quote::new(dec!(40))).unwrap();

        assert_eq!(ledger.balance(AccountId(1)).value(), dec!(60));
        assert_eq!(ledger.net_issued().value(), dec!(60));
    }

    #[test]
    fn burn_more_than_balance_fails() {
        let ledger = InMemoryLedger::new();
        ledger.credit(AccountId(1), Quote::new(dec!(10)));

        let err = ledger.burn(AccountId(1), Quote::new(dec!(11))).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(AccountId(1)).value(), dec!(10));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let ledger = InMemoryLedger::new();
        let batch = vec![
            LedgerInstruction::Issue { account: AccountId(2), amount: Quote::new(dec!(5)) },
            LedgerInstruction::PayFee { amount: Quote::new(dec!(1)), tracking_code: None },
            LedgerInstruction::Burn { account: AccountId(1), amount: Quote::new(dec!(50)) },
        ];

        assert!(ledger.settle(&batch).is_err());
        assert_eq!(ledger.balance(AccountId(2)), Quote::zero());
        assert_eq!(ledger.fee_pool(), Quote::zero());
    }

    #[test]
    fn fees_tracked_by_code() {
        let ledger = InMemoryLedger::new();
        ledger.pay_fee(Quote::new(dec!(3)), Some("frontend-a")).unwrap();
        ledger.pay_fee(Quote::new(dec!(2)), None).unwrap();

        assert_eq!(ledger.fee_pool().value(), dec!(5));
        assert_eq!(ledger.fees_for_tracking_code("frontend-a").value(), dec!(3));
    }

    #[test]
    fn negative_amounts_rejected() {
        let ledger = InMemoryLedger::new();
        let err = ledger.issue(AccountId(1), Quote::new(dec!(-1))).unwrap_err();
        assert_eq!(err, LedgerError::NegativeAmount(Quote::new(dec!(-1))));
    }
}
