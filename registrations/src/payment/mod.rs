//! Payments: wallet ledger, card gateway, and the reconciler that settles across both.

pub mod gateway;
pub mod reconciler;
pub mod wallet;

pub use gateway::{GatewayReceipt, MockPaymentGateway, PaymentGateway, PaymentGatewayError};
pub use reconciler::{PaymentError, PaymentReconciler, ReconciliationTask, SettlementRequest, Split, split};
pub use wallet::{InMemoryWallet, WalletError, WalletLedger};
