pub mod astar;
pub mod congestion;
pub mod diffpair;
pub mod driver;
pub mod evaluate;
pub mod metrics;

pub use driver::{RouteOutcome, route};
