//! Campus wallet balances.

use crate::types::{Money, TransactionId, UserId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Wallet errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Balance too low for the debit
    #[error("insufficient wallet balance: {balance} available, {requested} requested")]
    InsufficientFunds {
        /// Current balance
        balance: Money,
        /// Amount requested
        requested: Money,
    },
    /// The wallet service could not be reached
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

/// A user's stored-value wallet.
///
/// Debits and credits carry the settlement's [`TransactionId`] so a ledger can
/// correlate a compensating credit with the debit it reverses.
pub trait WalletLedger: Send + Sync {
    /// Current balance
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unavailable`] if the wallet cannot be read.
    fn balance(&self, user: UserId) -> Pin<Box<dyn Future<Output = WalletResult<Money>> + Send + '_>>;

    /// Take money out
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InsufficientFunds`] if the balance is too low.
    fn debit(
        &self,
        user: UserId,
        amount: Money,
        transaction: TransactionId,
    ) -> Pin<Box<dyn Future<Output = WalletResult<()>> + Send + '_>>;

    /// Put money back
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unavailable`] if the credit could not be applied.
    fn credit(
        &self,
        user: UserId,
        amount: Money,
        transaction: TransactionId,
    ) -> Pin<Box<dyn Future<Output = WalletResult<()>> + Send + '_>>;
}

/// In-process wallet ledger.
///
/// `fail_next_credits` makes the next N credits fail, to exercise compensation retries.
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: Mutex<HashMap<UserId, Money>>,
    failing_credits: AtomicUsize,
}

impl InMemoryWallet {
    /// Empty wallet ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Add funds to a user's wallet
    pub fn deposit(&self, user: UserId, amount: Money) {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry(user).or_default();
        *balance = *balance + amount;
    }

    /// Current balance without going through the async trait
    #[must_use]
    pub fn balance_of(&self, user: UserId) -> Money {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    /// Make the next `count` credits fail
    pub fn fail_next_credits(&self, count: usize) {
        self.failing_credits.store(count, Ordering::SeqCst);
    }
}

impl WalletLedger for InMemoryWallet {
    fn balance(&self, user: UserId) -> Pin<Box<dyn Future<Output = WalletResult<Money>> + Send + '_>> {
        let balance = self.balance_of(user);
        Box::pin(async move { Ok(balance) })
    }

    fn debit(
        &self,
        user: UserId,
        amount: Money,
        transaction: TransactionId,
    ) -> Pin<Box<dyn Future<Output = WalletResult<()>> + Send + '_>> {
        let result = {
            let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
            let balance = balances.entry(user).or_default();
            match balance.checked_sub(amount) {
                Some(rest) => {
                    *balance = rest;
                    tracing::debug!(%user, %amount, %transaction, "Wallet debited");
                    Ok(())
                },
                None => Err(WalletError::InsufficientFunds {
                    balance: *balance,
                    requested: amount,
                }),
            }
        };
        Box::pin(async move { result })
    }

    fn credit(
        &self,
        user: UserId,
        amount: Money,
        transaction: TransactionId,
    ) -> Pin<Box<dyn Future<Output = WalletResult<()>> + Send + '_>> {
        let should_fail = self
            .failing_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if should_fail {
            Err(WalletError::Unavailable("wallet ledger did not respond".to_string()))
        } else {
            self.deposit(user, amount);
            tracing::debug!(%user, %amount, %transaction, "Wallet credited");
            Ok(())
        };
        Box::pin(async move { result })
    }
}
