//! RiskForge: accounts-receivable risk triage
//!
//! Aggregates invoice history into per-customer features, groups customers
//! into Low / Medium / High risk tiers with K-Means, trains a decision-tree
//! forest that reproduces the tiers, and serves lookups and predictions from
//! the persisted artifacts.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod risk;
pub mod serve;
pub mod viz;

// Re-export public items for easier access
pub use classifier::{
    train_risk_classifier, ClassificationReport, LabelEncoder, RiskPredictor, TrainParams,
    TrainingOutcome,
};
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{
    load_and_process_data, read_risk_table, write_risk_table, CustomerFeatures, FeatureTable,
    RiskRow, RiskTable, FEATURE_COLUMNS,
};
pub use error::PipelineError;
pub use model::{fit_risk_clusters, ClusterParams, RiskClustering};
pub use risk::RiskLevel;
pub use serve::{AppContext, PredictionOutcome};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
