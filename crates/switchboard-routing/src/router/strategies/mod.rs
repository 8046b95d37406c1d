/// Ledger- and resource-aware single-model routing
pub mod adaptive;
/// Cheapest adequate model
pub mod cost;
/// Largest model
pub mod quality;
/// Smallest model
pub mod speed;
/// Chain and ensemble planning
pub mod workflow;

pub use adaptive::AdaptiveStrategy;
pub use cost::CostStrategy;
pub use quality::QualityStrategy;
pub use speed::SpeedStrategy;
pub use workflow::WorkflowStrategy;
