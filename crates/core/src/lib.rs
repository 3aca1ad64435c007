pub mod config;
pub mod config_loader;
pub mod errors;
pub mod events;
pub mod trade;
pub mod traits;

pub use config::{AppConfig, PyramidStep, RiskConfig};
pub use config_loader::ConfigLoader;
pub use errors::{GatewayError, PriceError, RegistryError, TradeError};
pub use events::{StopMoveReason, TradeEvent, TradeEventKind};
pub use trade::{CloseReason, Side, TradeId, TradeIntent, TradeRecord, TradeStatus};
pub use traits::{EntrySpec, OrderGateway, PriceSource};
