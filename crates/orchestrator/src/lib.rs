pub mod commands;
pub mod coordinator;
pub mod handle;
pub mod monitor;
pub mod registry;
pub mod supervisor;

pub use commands::{MonitorCommand, SpawnRequest};
pub use coordinator::LifecycleCoordinator;
pub use handle::MonitorHandle;
pub use monitor::TradeMonitor;
pub use registry::TradeRegistry;
pub use supervisor::MonitorSupervisor;
