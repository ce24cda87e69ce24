//! Chain access: ABI definitions and the balance/broadcast/receipt client.

pub mod client;
pub mod contracts;

pub use client::{ChainClient, EvmChainClient, HttpProvider, ReceiptStatus, TransferTx};
