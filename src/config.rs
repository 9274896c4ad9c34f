//! File layout of the pipeline

use std::env;
use std::path::PathBuf;

/// Where every stage reads its input and writes its output
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Raw invoice CSV
    pub invoices_path: PathBuf,

    /// Customer risk table written by the clusterer
    pub risk_table_path: PathBuf,

    /// Tier distribution chart written by the clusterer
    pub distribution_chart_path: PathBuf,

    /// Serialized classifier
    pub model_path: PathBuf,

    /// Serialized label encoder
    pub encoder_path: PathBuf,

    /// Directory for charts regenerated from the persisted table
    pub plots_dir: PathBuf,

    /// Directory for per-customer history charts
    pub customer_charts_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            invoices_path: PathBuf::from("data/Accounts-Receivable.csv"),
            risk_table_path: PathBuf::from("outputs/customer_risk_clusters.csv"),
            distribution_chart_path: PathBuf::from("outputs/risk_cluster_distribution.png"),
            model_path: PathBuf::from("models/risk_classifier.json"),
            encoder_path: PathBuf::from("models/risk_label_encoder.json"),
            plots_dir: PathBuf::from("static/plots"),
            customer_charts_dir: PathBuf::from("static/customer_charts"),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `RISKFORGE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let path = |key: &str, default: PathBuf| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        Self {
            invoices_path: path("RISKFORGE_INVOICES", defaults.invoices_path),
            risk_table_path: path("RISKFORGE_RISK_TABLE", defaults.risk_table_path),
            distribution_chart_path: path(
                "RISKFORGE_DISTRIBUTION_CHART",
                defaults.distribution_chart_path,
            ),
            model_path: path("RISKFORGE_MODEL", defaults.model_path),
            encoder_path: path("RISKFORGE_ENCODER", defaults.encoder_path),
            plots_dir: path("RISKFORGE_PLOTS_DIR", defaults.plots_dir),
            customer_charts_dir: path("RISKFORGE_CUSTOMER_CHARTS_DIR", defaults.customer_charts_dir),
        }
    }

    /// Distribution chart regenerated by the `plot` command
    pub fn static_distribution_chart_path(&self) -> PathBuf {
        self.plots_dir.join("risk_cluster_distribution.png")
    }

    /// History chart path for one customer; characters unsafe in file
    /// names are replaced with `_`
    pub fn customer_chart_path(&self, customer_id: &str) -> PathBuf {
        let file_stem: String = customer_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.customer_charts_dir.join(format!("{file_stem}.png"))
    }
}
