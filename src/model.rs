//! K-Means risk clustering

use crate::data::{FeatureTable, RiskRow, RiskTable, AVG_DAYS_LATE};
use crate::error::PipelineError;
use crate::risk::{rank_clusters, RiskLevel};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Number of risk tiers, and therefore of K-Means clusters
pub const RISK_CLUSTERS: usize = 3;

/// K-Means settings for the risk clusterer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    /// Seed for centroid initialization
    pub seed: u64,
    /// Independent initializations; the lowest-inertia run wins
    pub n_runs: usize,
    pub max_iters: usize,
    pub tolerance: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            seed: 42,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted clustering with each cluster mapped to a risk tier
#[derive(Debug)]
pub struct RiskClustering {
    /// Fitted K-Means model from linfa
    pub model: KMeans<f64, L2Dist>,
    /// Scaler fitted on the clustered table only
    pub scaler: LinearScaler<f64>,
    /// Scaled feature matrix the model was fitted on
    pub features: Array2<f64>,
    /// Cluster id of every customer, in table order
    pub labels: Array1<usize>,
    /// Cluster centroids in scaled space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
    /// Risk tier of each cluster id
    pub tier_of_cluster: Vec<RiskLevel>,
}

impl RiskClustering {
    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters()];
        for &label in self.labels.iter() {
            if label < sizes.len() {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Risk tier of every customer, in table order
    pub fn risk_levels(&self) -> Vec<RiskLevel> {
        self.labels
            .iter()
            .map(|&cluster| self.tier_of_cluster[cluster])
            .collect()
    }

    /// Join the clustering back onto the feature table
    pub fn risk_table(&self, table: &FeatureTable) -> RiskTable {
        let rows = table
            .customers
            .iter()
            .zip(self.labels.iter())
            .map(|(features, &cluster)| RiskRow {
                features: features.clone(),
                risk_cluster: cluster,
                risk_level: self.tier_of_cluster[cluster],
            })
            .collect();
        RiskTable { rows }
    }

    /// Mean silhouette coefficient over the first `sample_size` customers
    pub fn compute_silhouette_sample(&self, sample_size: usize) -> f64 {
        let n_samples = self.features.nrows().min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }
        let n_clusters = self.n_clusters();

        let mut silhouette_sum = 0.0;
        for i in 0..n_samples {
            let point = self.features.row(i);
            let cluster_label = self.labels[i];

            let mut same_cluster = Vec::new();
            let mut other_clusters: Vec<Vec<f64>> = vec![Vec::new(); n_clusters];

            for j in 0..n_samples {
                if i == j {
                    continue;
                }
                let distance = euclidean_distance(&point, &self.features.row(j));
                let other_label = self.labels[j];
                if other_label == cluster_label {
                    same_cluster.push(distance);
                } else if other_label < n_clusters {
                    other_clusters[other_label].push(distance);
                }
            }

            let a_i = mean(&same_cluster).unwrap_or(0.0);
            let b_i = other_clusters
                .iter()
                .filter_map(|d| mean(d))
                .fold(f64::INFINITY, f64::min);

            silhouette_sum += if b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0) {
                0.0
            } else {
                (b_i - a_i) / a_i.max(b_i)
            };
        }

        silhouette_sum / n_samples as f64
    }
}

/// Standardize the feature table, partition it into three clusters and rank
/// the clusters into Low / Medium / High risk by mean lateness.
pub fn fit_risk_clusters(table: &FeatureTable, params: &ClusterParams) -> crate::Result<RiskClustering> {
    if table.len() < RISK_CLUSTERS {
        return Err(PipelineError::TooFewCustomers {
            required: RISK_CLUSTERS,
            found: table.len(),
        }
        .into());
    }

    let raw = table.matrix();
    let n_samples = raw.nrows();
    let raw_dataset = Dataset::new(raw.clone(), Array1::<usize>::zeros(n_samples));
    let scaler = LinearScaler::standard().fit(&raw_dataset)?;
    let features = scaler.transform(raw);

    let dataset = Dataset::new(features.clone(), Array1::<usize>::zeros(n_samples));

    let rng = StdRng::seed_from_u64(params.seed);
    let model = KMeans::params_with(RISK_CLUSTERS, rng, L2Dist)
        .n_runs(params.n_runs.max(1))
        .max_n_iterations(params.max_iters as u64)
        .tolerance(params.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(&features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&features, &labels, &centroids);

    let centroid_days_late: Vec<f64> = centroids
        .column(AVG_DAYS_LATE)
        .iter()
        .map(|&v| unscale(&scaler, AVG_DAYS_LATE, v))
        .collect();
    let tier_of_cluster = rank_clusters(&labels, &table.avg_days_late(), &centroid_days_late);

    debug!(
        inertia,
        tiers = ?tier_of_cluster,
        "risk clusters ranked"
    );

    Ok(RiskClustering {
        model,
        scaler,
        features,
        labels,
        centroids,
        inertia,
        tier_of_cluster,
    })
}

/// Map one standardized value of `feature` back to raw units
fn unscale(scaler: &LinearScaler<f64>, feature: usize, value: f64) -> f64 {
    value / scaler.scales()[feature] + scaler.offsets()[feature]
}

fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|&(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

fn euclidean_distance(a: &ndarray::ArrayView1<f64>, b: &ndarray::ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
