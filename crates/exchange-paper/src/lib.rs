pub mod gateway;
pub mod prices;

pub use gateway::PaperGateway;
pub use prices::{ScriptedPriceSource, StaticPriceSource};
