//! Command-line interface definitions and argument parsing

use crate::classifier::TrainParams;
use crate::config::PipelineConfig;
use crate::model::ClusterParams;
use crate::risk::RiskLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Accounts-receivable risk triage: cluster customers into risk tiers and
/// train a classifier that reproduces them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Raw invoice CSV
    #[arg(long, global = true)]
    pub invoices: Option<PathBuf>,

    /// Customer risk table (written by `cluster`, read by later stages)
    #[arg(long, global = true)]
    pub risk_table: Option<PathBuf>,

    /// Serialized classifier
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Serialized label encoder
    #[arg(long, global = true)]
    pub encoder: Option<PathBuf>,

    /// Seed for clustering, the train/test split and the forest
    #[arg(long, global = true, default_value = "42")]
    pub seed: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Aggregate invoices, cluster customers into risk tiers and save the table
    Cluster(ClusterArgs),

    /// Train the risk classifier on the saved risk table
    Train(TrainArgs),

    /// Run `cluster` then `train`
    Run {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        train: TrainArgs,
    },

    /// Redraw the tier distribution chart from the saved risk table
    Plot {
        /// Output path (defaults to <plots dir>/risk_cluster_distribution.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the risk table, optionally only one tier
    Dashboard {
        /// Tier to show, e.g. "High Risk"
        #[arg(long)]
        risk: Option<RiskLevel>,
    },

    /// Predict the risk tier of a customer and chart its lateness history
    Predict {
        customer_id: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Independent K-Means initializations (best inertia wins)
    #[arg(long, default_value = "10")]
    pub n_runs: usize,

    /// Maximum iterations for K-Means
    #[arg(long, default_value = "300")]
    pub max_iters: usize,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Output path for the tier distribution chart
    #[arg(long)]
    pub chart: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TrainArgs {
    /// Fraction of customers held out for evaluation
    #[arg(long, default_value = "0.3", value_parser = parse_fraction)]
    pub test_size: f64,

    /// Trees in the forest
    #[arg(long, default_value = "100")]
    pub n_trees: usize,

    /// Maximum tree depth (unbounded when omitted)
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Features sampled per tree (all when omitted)
    #[arg(long)]
    pub max_features: Option<usize>,
}

impl Args {
    /// Environment-derived config with command-line path overrides applied
    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_env();
        if let Some(ref path) = self.invoices {
            config.invoices_path = path.clone();
        }
        if let Some(ref path) = self.risk_table {
            config.risk_table_path = path.clone();
        }
        if let Some(ref path) = self.model {
            config.model_path = path.clone();
        }
        if let Some(ref path) = self.encoder {
            config.encoder_path = path.clone();
        }
        let chart = match &self.command {
            Command::Cluster(cluster) | Command::Run { cluster, .. } => cluster.chart.as_ref(),
            _ => None,
        };
        if let Some(path) = chart {
            config.distribution_chart_path = path.clone();
        }
        config
    }
}

impl ClusterArgs {
    pub fn params(&self, seed: u64) -> ClusterParams {
        ClusterParams {
            seed,
            n_runs: self.n_runs,
            max_iters: self.max_iters,
            tolerance: self.tolerance,
        }
    }
}

impl TrainArgs {
    pub fn params(&self, seed: u64) -> TrainParams {
        TrainParams {
            seed,
            test_size: self.test_size,
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            max_features: self.max_features,
        }
    }
}

/// A fraction strictly between 0 and 1
fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid fraction: {s}"))?;
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(format!("fraction must be between 0 and 1, got {value}"))
    }
}
