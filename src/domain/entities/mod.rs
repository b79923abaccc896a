pub mod chat;
pub mod model;
pub mod record;
pub mod season;
pub mod snapshot;
pub mod trade;

pub use chat::{ChatDecision, ChatEntry};
pub use model::ModelRef;
pub use record::{RawRecord, RecordPayload, SourceKind};
pub use season::{Season, SeasonStatus};
pub use snapshot::Standing;
pub use trade::{TradeFill, TradeSide, TradeStatus};
