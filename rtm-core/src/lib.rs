pub mod classify;
pub mod config;
pub mod coverage;
pub mod criteria;
pub mod export;
pub mod gateway;
pub mod matrix;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod runner;
pub mod sprint;

// Re-export commonly used types
pub use classify::{classify_scenario_type, map_priority};
pub use config::{
    default_database_path, AppConfig, EmptyCriteriaPolicy, EngineConfig, FieldMap,
    ReconcilePolicy, UnreferencedTestPolicy, DEFAULT_CONCURRENCY,
};
pub use coverage::{
    CoverageStatistics, Kpi, ModuleCoverage, ModuleRanking, OverallCoverage, RiskArea,
};
pub use export::{
    export_json, export_workbook, render_markdown, render_workbook_csv, ReportDocument,
};
pub use gateway::{
    AzureDevOpsGateway, AzureSourceFactory, GatewayConfig, GatewayError, InMemorySource,
    ProjectInfo, RetryPolicy, SourceFactory, WorkItemSource,
};
pub use matrix::{EngineError, RtmEngine};
pub use models::{
    CoverageStatus, Diagnostic, DiagnosticKind, Execution, Iteration, LinkedRef, MatrixReport,
    MatrixRow, Priority, Requirement, ScenarioType, TestCase, TimeFrame, WorkItem,
};
pub use reconcile::reconcile;
pub use registry::{
    mask_token, Connection, ConnectionRegistry, ConnectionSummary, ConnectionUpdate,
    NewConnection, RegistryError,
};
pub use runner::run_bounded;
pub use sprint::{list_sprints, resolve_sprint};
