//! Invoice loading, per-customer feature aggregation and the risk table, using Polars

use crate::error::PipelineError;
use crate::io::write_atomic;
use crate::risk::RiskLevel;
use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Columns every raw invoice file must carry
pub const INVOICE_COLUMNS: [&str; 6] = [
    "customerID",
    "invoiceNumber",
    "InvoiceDate",
    "InvoiceAmount",
    "DaysLate",
    "Disputed",
];

/// Feature order used for scaling, clustering, training and prediction
pub const FEATURE_COLUMNS: [&str; 6] = [
    "total_invoices",
    "avg_days_late",
    "max_days_late",
    "total_days_late",
    "avg_invoice_amount",
    "total_disputes",
];

/// Index of `avg_days_late` in [`FEATURE_COLUMNS`]
pub const AVG_DAYS_LATE: usize = 1;

/// Columns of the persisted customer risk table, in order
pub const RISK_TABLE_COLUMNS: [&str; 9] = [
    "customerID",
    "total_invoices",
    "avg_days_late",
    "max_days_late",
    "total_days_late",
    "avg_invoice_amount",
    "total_disputes",
    "risk_cluster",
    "risk_level",
];

/// Behavioral summary of one customer's invoices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatures {
    pub customer_id: String,
    pub total_invoices: u32,
    pub avg_days_late: f64,
    pub max_days_late: f64,
    pub total_days_late: f64,
    pub avg_invoice_amount: f64,
    pub total_disputes: u32,
}

impl CustomerFeatures {
    /// The six numeric features in [`FEATURE_COLUMNS`] order
    pub fn to_vector(&self) -> [f64; 6] {
        [
            self.total_invoices as f64,
            self.avg_days_late,
            self.max_days_late,
            self.total_days_late,
            self.avg_invoice_amount,
            self.total_disputes as f64,
        ]
    }
}

/// One feature row per distinct customer, sorted by customer id
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub customers: Vec<CustomerFeatures>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Raw feature matrix (n_customers, 6)
    pub fn matrix(&self) -> Array2<f64> {
        features_matrix(self.customers.iter())
    }

    pub fn avg_days_late(&self) -> Vec<f64> {
        self.customers.iter().map(|c| c.avg_days_late).collect()
    }
}

/// Stack feature vectors into an (n, 6) matrix
pub fn features_matrix<'a, I>(customers: I) -> Array2<f64>
where
    I: IntoIterator<Item = &'a CustomerFeatures>,
{
    let flat: Vec<f64> = customers
        .into_iter()
        .flat_map(|c| c.to_vector())
        .collect();
    let n = flat.len() / FEATURE_COLUMNS.len();
    Array2::from_shape_fn((n, FEATURE_COLUMNS.len()), |(i, j)| flat[i * FEATURE_COLUMNS.len() + j])
}

/// Identifier columns read as text, so `0379` stays distinct from `379`
const TEXT_COLUMNS: [&str; 2] = ["customerID", "invoiceNumber"];

/// Read a CSV file eagerly and check that `required` columns are present
fn read_csv(path: &Path, required: &[&str]) -> crate::Result<DataFrame> {
    let header = LazyCsvReader::new(path)
        .with_infer_schema_length(Some(0))
        .finish()
        .and_then(|mut lf| lf.schema())
        .with_context(|| format!("reading header of {}", path.display()))?;

    let missing: Vec<String> = required
        .iter()
        .filter(|name| !header.contains(name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            path: path.display().to_string(),
            missing,
        }
        .into());
    }

    let text_columns: Schema = TEXT_COLUMNS
        .iter()
        .filter(|name| header.contains(name))
        .map(|name| Field::new(name, DataType::String))
        .collect();

    let df = LazyCsvReader::new(path)
        .with_infer_schema_length(Some(10_000))
        .with_dtype_overwrite(Some(Arc::new(text_columns)))
        .finish()
        .and_then(|lf| lf.collect())
        .with_context(|| format!("reading {}", path.display()))?;

    if df.height() == 0 {
        return Err(PipelineError::EmptyInput(path.display().to_string()).into());
    }

    Ok(df)
}

/// Load the raw invoice CSV, aborting if any required column is missing
pub fn load_invoices(path: &Path) -> crate::Result<DataFrame> {
    let df = read_csv(path, &INVOICE_COLUMNS)?;
    info!(path = %path.display(), rows = df.height(), "invoices loaded");
    Ok(df)
}

/// Group invoices by customer and compute the six behavioral features.
///
/// Rows without a customer id are not grouped. Customers whose lateness or
/// amount aggregates are null make the whole run fail.
pub fn aggregate_features(invoices: DataFrame) -> crate::Result<FeatureTable> {
    let df = invoices
        .lazy()
        .with_columns([
            col("customerID").cast(DataType::String),
            col("DaysLate").cast(DataType::Float64),
            col("InvoiceAmount").cast(DataType::Float64),
            col("Disputed").cast(DataType::String),
        ])
        .filter(col("customerID").is_not_null())
        .group_by([col("customerID")])
        .agg([
            col("invoiceNumber").count().alias("total_invoices"),
            col("DaysLate").mean().alias("avg_days_late"),
            col("DaysLate").max().alias("max_days_late"),
            col("DaysLate").sum().alias("total_days_late"),
            col("InvoiceAmount").mean().alias("avg_invoice_amount"),
            col("Disputed")
                .eq(lit("Yes"))
                .cast(DataType::UInt32)
                .sum()
                .alias("total_disputes"),
        ])
        .sort(["customerID"], SortMultipleOptions::default())
        .collect()?;

    let customers = feature_rows(&df)?;
    debug!(customers = customers.len(), "features aggregated");
    Ok(FeatureTable { customers })
}

/// Load the invoice CSV and aggregate it into a feature table
pub fn load_and_process_data(path: &Path) -> crate::Result<FeatureTable> {
    let invoices = load_invoices(path)?;
    aggregate_features(invoices)
}

/// Convert an aggregated frame with the feature columns into typed rows
fn feature_rows(df: &DataFrame) -> crate::Result<Vec<CustomerFeatures>> {
    let ids = str_column(df, "customerID")?;
    let total_invoices = u32_column(df, "total_invoices")?;
    let avg_days_late = f64_column(df, "avg_days_late")?;
    let max_days_late = f64_column(df, "max_days_late")?;
    let total_days_late = f64_column(df, "total_days_late")?;
    let avg_invoice_amount = f64_column(df, "avg_invoice_amount")?;
    let total_disputes = u32_column(df, "total_disputes")?;

    let mut rows = Vec::with_capacity(ids.len());
    for i in 0..ids.len() {
        let customer_id = ids[i].clone().unwrap_or_default();
        let required = |value: Option<f64>, feature: &'static str| {
            value.ok_or_else(|| PipelineError::NullFeature {
                customer_id: customer_id.clone(),
                feature,
            })
        };

        let avg = required(avg_days_late[i], "avg_days_late")?;
        let max = required(max_days_late[i], "max_days_late")?;
        let total = required(total_days_late[i], "total_days_late")?;
        let amount = required(avg_invoice_amount[i], "avg_invoice_amount")?;

        rows.push(CustomerFeatures {
            customer_id,
            total_invoices: total_invoices[i].unwrap_or(0),
            avg_days_late: avg,
            max_days_late: max,
            total_days_late: total,
            avg_invoice_amount: amount,
            total_disputes: total_disputes[i].unwrap_or(0),
        });
    }
    Ok(rows)
}

fn str_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    Ok(df
        .column(name)?
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn f64_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    Ok(df
        .column(name)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .collect())
}

fn u32_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<u32>>> {
    Ok(df
        .column(name)?
        .cast(&DataType::UInt32)?
        .u32()?
        .into_iter()
        .collect())
}

/// A customer's features together with its cluster and risk tier
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRow {
    pub features: CustomerFeatures,
    pub risk_cluster: usize,
    pub risk_level: RiskLevel,
}

/// The persisted customer -> risk tier table
#[derive(Debug, Clone, Default)]
pub struct RiskTable {
    pub rows: Vec<RiskRow>,
}

impl RiskTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find(&self, customer_id: &str) -> Option<&RiskRow> {
        self.rows
            .iter()
            .find(|row| row.features.customer_id == customer_id)
    }

    pub fn risk_levels(&self) -> Vec<RiskLevel> {
        self.rows.iter().map(|row| row.risk_level).collect()
    }
}

/// Write the risk table, replacing any previous version in one step
pub fn write_risk_table(path: &Path, table: &RiskTable) -> crate::Result<()> {
    let rows = &table.rows;
    let mut df = df!(
        "customerID" => rows.iter().map(|r| r.features.customer_id.as_str()).collect::<Vec<_>>(),
        "total_invoices" => rows.iter().map(|r| r.features.total_invoices).collect::<Vec<_>>(),
        "avg_days_late" => rows.iter().map(|r| r.features.avg_days_late).collect::<Vec<_>>(),
        "max_days_late" => rows.iter().map(|r| r.features.max_days_late).collect::<Vec<_>>(),
        "total_days_late" => rows.iter().map(|r| r.features.total_days_late).collect::<Vec<_>>(),
        "avg_invoice_amount" => rows.iter().map(|r| r.features.avg_invoice_amount).collect::<Vec<_>>(),
        "total_disputes" => rows.iter().map(|r| r.features.total_disputes).collect::<Vec<_>>(),
        "risk_cluster" => rows.iter().map(|r| r.risk_cluster as u32).collect::<Vec<_>>(),
        "risk_level" => rows.iter().map(|r| r.risk_level.as_str()).collect::<Vec<_>>(),
    )?;

    write_atomic(path, |file| {
        CsvWriter::new(file).include_header(true).finish(&mut df)?;
        Ok(())
    })?;

    info!(path = %path.display(), rows = rows.len(), "risk table written");
    Ok(())
}

/// Read a risk table written by [`write_risk_table`]
pub fn read_risk_table(path: &Path) -> crate::Result<RiskTable> {
    let df = read_csv(path, &RISK_TABLE_COLUMNS)?;
    let features = feature_rows(&df)?;
    let clusters = u32_column(&df, "risk_cluster")?;
    let levels = str_column(&df, "risk_level")?;

    let rows = features
        .into_iter()
        .zip(clusters)
        .zip(levels)
        .map(|((features, cluster), level)| {
            let risk_level = level.unwrap_or_default().parse::<RiskLevel>()?;
            Ok(RiskRow {
                features,
                risk_cluster: cluster.unwrap_or(0) as usize,
                risk_level,
            })
        })
        .collect::<crate::Result<Vec<_>>>()?;

    debug!(path = %path.display(), rows = rows.len(), "risk table loaded");
    Ok(RiskTable { rows })
}

/// One historical invoice of a customer, for charting
#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePoint {
    pub date: NaiveDate,
    pub days_late: f64,
}

/// Parse an invoice date in ISO (`2013-01-02`, optionally with a time) or
/// US (`1/2/2013`) form
pub fn parse_invoice_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    let raw = raw.trim();
    const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M"];

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .ok_or_else(|| PipelineError::InvalidDate(raw.to_string()))
}

/// Raw invoice history of one customer, oldest first
pub fn load_customer_history(path: &Path, customer_id: &str) -> crate::Result<Vec<InvoicePoint>> {
    let df = read_csv(path, &INVOICE_COLUMNS)?
        .lazy()
        .select([
            col("customerID").cast(DataType::String),
            col("InvoiceDate").cast(DataType::String),
            col("DaysLate").cast(DataType::Float64),
        ])
        .filter(col("customerID").eq(lit(customer_id)))
        .collect()?;

    let dates = str_column(&df, "InvoiceDate")?;
    let days_late = f64_column(&df, "DaysLate")?;

    let mut history = Vec::with_capacity(dates.len());
    for (date, late) in dates.into_iter().zip(days_late) {
        let (Some(date), Some(days_late)) = (date, late) else {
            continue;
        };
        history.push(InvoicePoint {
            date: parse_invoice_date(&date)?,
            days_late,
        });
    }
    history.sort_by_key(|p| p.date);
    Ok(history)
}
