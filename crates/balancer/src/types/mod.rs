pub mod intent;
pub mod price;
pub mod scaled;

pub use intent::{
    fired_at_window, idem_key, AmountSpec, Direction, ExecutionMode, IntentStatus,
    TransferIntent, TransferSignal,
};
pub use price::{ConsolidatedPrice, PriceMode, Quote, QuoteMeta, SourceKind};
