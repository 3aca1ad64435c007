pub mod engine;

pub use engine::{breakeven_stop, evaluate, trailing_stop, Action, Decision};
