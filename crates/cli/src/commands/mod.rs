mod check_config;
mod simulate;

pub use check_config::run_check_config;
pub use simulate::run_simulate;
