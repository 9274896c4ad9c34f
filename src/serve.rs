//! Lookups and predictions over the persisted pipeline outputs

use crate::classifier::RiskPredictor;
use crate::config::PipelineConfig;
use crate::data::{load_customer_history, read_risk_table, RiskRow, RiskTable};
use crate::risk::RiskLevel;
use crate::viz::create_customer_history_chart;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Artifacts the dashboard and predictor read, loaded together
#[derive(Debug)]
pub struct AppContext {
    config: PipelineConfig,
    table: RiskTable,
    predictor: RiskPredictor,
}

/// A classifier verdict for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub customer_id: String,
    /// Tier predicted by the classifier
    pub risk_level: RiskLevel,
    /// Tier the clusterer assigned
    pub clustered_level: RiskLevel,
    /// History chart, when the customer has raw invoices on file
    pub chart_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Predicted(Prediction),
    NotFound(String),
}

impl fmt::Display for PredictionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionOutcome::NotFound(id) => write!(f, "Customer ID '{id}' not found."),
            PredictionOutcome::Predicted(p) => write!(f, "{}", p.risk_level),
        }
    }
}

impl AppContext {
    pub fn load(config: PipelineConfig) -> crate::Result<Self> {
        let table = read_risk_table(&config.risk_table_path)?;
        let predictor = RiskPredictor::load(&config.model_path, &config.encoder_path)?;
        info!(
            customers = table.len(),
            fingerprint = %predictor.schema().fingerprint,
            "serving context loaded"
        );
        Ok(Self {
            config,
            table,
            predictor,
        })
    }

    /// Re-read the risk table and the model pair. The current state is kept
    /// if anything fails to load.
    pub fn reload(&mut self) -> crate::Result<()> {
        let fresh = Self::load(self.config.clone())?;
        *self = fresh;
        Ok(())
    }

    pub fn table(&self) -> &RiskTable {
        &self.table
    }

    pub fn predictor(&self) -> &RiskPredictor {
        &self.predictor
    }

    /// All rows, or only those of one tier
    pub fn dashboard(&self, filter: Option<RiskLevel>) -> Vec<&RiskRow> {
        self.table
            .rows
            .iter()
            .filter(|row| filter.map_or(true, |level| row.risk_level == level))
            .collect()
    }

    /// Tiers present in the table, lowest first
    pub fn risk_levels(&self) -> Vec<RiskLevel> {
        let mut levels = self.table.risk_levels();
        levels.sort();
        levels.dedup();
        levels
    }

    /// Classify one customer by id and chart its lateness history.
    ///
    /// An unknown id is a [`PredictionOutcome::NotFound`], not an error.
    pub fn predict(&self, customer_id: &str) -> crate::Result<PredictionOutcome> {
        let customer_id = customer_id.trim();
        let Some(row) = self.table.find(customer_id) else {
            info!(customer_id, "customer not found");
            return Ok(PredictionOutcome::NotFound(customer_id.to_string()));
        };

        let risk_level = self.predictor.predict(&row.features)?;
        if risk_level != row.risk_level {
            warn!(
                customer_id,
                predicted = %risk_level,
                clustered = %row.risk_level,
                "classifier disagrees with cluster tier"
            );
        }

        let history = load_customer_history(&self.config.invoices_path, customer_id)?;
        let chart_path = if history.is_empty() {
            None
        } else {
            let path = self.config.customer_chart_path(customer_id);
            create_customer_history_chart(customer_id, &history, &path)?;
            Some(path)
        };

        Ok(PredictionOutcome::Predicted(Prediction {
            customer_id: customer_id.to_string(),
            risk_level,
            clustered_level: row.risk_level,
            chart_path,
        }))
    }
}
