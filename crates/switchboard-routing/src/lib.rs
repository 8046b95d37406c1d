//! Adaptive strategy and multi-model orchestration engine.
//!
//! A request flows through the [`ContextAnalyzer`], the [`StrategyRouter`] and the
//! [`ConstraintEnforcer`] to become a [`RoutingDecision`], which the
//! [`Orchestrator`] executes as a single call, a [`ChainExecutor`] pipeline or an
//! [`EnsembleExecutor`] vote. Decisions and their outcomes land in the
//! [`PerformanceLedger`], which the adaptive strategies read back.

pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod constraints;
pub mod decision;
pub mod error;
pub mod learning;
pub mod ledger;
pub mod orchestrator;
pub mod resources;
pub mod router;
pub mod types;
pub mod workflow;

pub use analyzer::{ComplexityScorer, ContextAnalyzer, HeuristicScorer};
pub use catalog::{ModelCatalog, ModelDescriptor};
pub use config::{
    AdaptiveConfig, BackendConfig, ChainConfig, ComplexityWeights, EngineConfig, EnsembleConfig,
    LedgerConfig, ResourceConfig, RoutingSettings,
};
pub use constraints::{ConstraintEnforcer, SoftViolation};
pub use decision::{
    ChainPlan, ChainStep, EnsemblePlan, ExecutionPlan, MergeStrategy, RoutingDecision, StepRole,
    VotingStrategy,
};
pub use error::{Result, RoutingError};
pub use learning::{
    KeywordThemeDetector, LedgerParameterTuner, ParameterTuner, ThemeDetector, ThemeSuggestion,
    TunedParameters,
};
pub use ledger::{
    JsonLedgerStore, LedgerStore, MemoryLedgerStore, Outcome, OutcomeStatus, PerformanceLedger,
    PerformanceRecord, PerformanceSummary, RecordFilter, UserFeedback,
};
pub use orchestrator::{
    ExecutionResult, FailedAttempt, Orchestrator, RouteOutcome, RouteWarning, SingleResult,
    default_router,
};
pub use resources::{ResourceMonitor, StaticMonitor, SystemMonitor};
pub use router::{RoutingStrategy, StrategyInputs, StrategyKind, StrategyRouter};
pub use types::{
    BatteryState, ComplexityBand, Domain, FileType, HistoryEntry, InteractionMode, ManualOverrides,
    RequestContext, ResourceState,
};
pub use workflow::{
    ChainExecutor, ChainResult, EnsembleAnswer, EnsembleExecutor, EnsembleResult, ModelVerdict,
    Verdict,
};
