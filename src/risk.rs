//! Risk tiers and the cluster-to-tier ranking step

use crate::error::PipelineError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A customer's risk tier. Variants are declared in severity order, so the
/// derived `Ord` sorts Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// All tiers, lowest lateness first. Also the fixed category order for charts.
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    /// The on-disk spelling used in the risk table and artifacts
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low Risk" => Ok(RiskLevel::Low),
            "Medium Risk" => Ok(RiskLevel::Medium),
            "High Risk" => Ok(RiskLevel::High),
            other => Err(PipelineError::UnknownLabel(other.to_string())),
        }
    }
}

impl From<RiskLevel> for String {
    fn from(level: RiskLevel) -> Self {
        level.as_str().to_string()
    }
}

impl TryFrom<String> for RiskLevel {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Map each cluster id to a risk tier by ranking clusters on the mean
/// `avg_days_late` of their members, ascending.
///
/// Ties go to the lower cluster id. A cluster with no members is ranked by
/// `centroid_days_late`, its centroid mapped back to raw units. The result is
/// indexed by cluster id.
pub fn rank_clusters(
    labels: &Array1<usize>,
    avg_days_late: &[f64],
    centroid_days_late: &[f64],
) -> Vec<RiskLevel> {
    let n_clusters = centroid_days_late.len();
    let mut sums = vec![0.0; n_clusters];
    let mut counts = vec![0usize; n_clusters];

    for (&cluster, &late) in labels.iter().zip(avg_days_late) {
        if cluster < n_clusters {
            sums[cluster] += late;
            counts[cluster] += 1;
        }
    }

    let means: Vec<f64> = (0..n_clusters)
        .map(|c| {
            if counts[c] == 0 {
                centroid_days_late[c]
            } else {
                sums[c] / counts[c] as f64
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..n_clusters).collect();
    order.sort_by(|&a, &b| means[a].total_cmp(&means[b]).then(a.cmp(&b)));

    let mut tiers = vec![RiskLevel::High; n_clusters];
    for (rank, &cluster) in order.iter().enumerate() {
        tiers[cluster] = RiskLevel::ALL[rank.min(RiskLevel::ALL.len() - 1)];
    }
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_parse_and_display() {
        for level in RiskLevel::ALL {
            assert_eq!(level.to_string().parse::<RiskLevel>().unwrap(), level);
        }
        assert!("low risk".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        let mut levels = vec![RiskLevel::High, RiskLevel::Low, RiskLevel::Medium];
        levels.sort();
        assert_eq!(levels, RiskLevel::ALL.to_vec());
    }

    #[test]
    fn test_rank_clusters_ignores_cluster_ids() {
        // cluster 2 is the least late, cluster 0 the most
        let labels = array![0, 1, 2, 0, 2];
        let late = [40.0, 15.0, 2.0, 38.0, 4.0];
        let tiers = rank_clusters(&labels, &late, &[0.0, 0.0, 0.0]);

        assert_eq!(tiers, vec![RiskLevel::High, RiskLevel::Medium, RiskLevel::Low]);
    }

    #[test]
    fn test_rank_clusters_ties_use_cluster_id() {
        let labels = array![0, 1, 2];
        let late = [5.0, 5.0, 1.0];
        let tiers = rank_clusters(&labels, &late, &[0.0, 0.0, 0.0]);

        assert_eq!(tiers, vec![RiskLevel::Medium, RiskLevel::High, RiskLevel::Low]);
    }

    #[test]
    fn test_rank_clusters_empty_cluster_uses_centroid() {
        let labels = array![0, 0, 2];
        let late = [10.0, 12.0, 30.0];
        let tiers = rank_clusters(&labels, &late, &[11.0, 1.0, 30.0]);

        assert_eq!(tiers, vec![RiskLevel::Medium, RiskLevel::Low, RiskLevel::High]);
    }

    #[test]
    fn test_serde_uses_display_spelling() {
        let json = serde_json::to_string(&RiskLevel::Medium).unwrap();
        assert_eq!(json, "\"Medium Risk\"");
        let back: RiskLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RiskLevel::Medium);
    }
}
