//! Risk tier classifier: label encoding, a bagged decision-tree forest,
//! held-out evaluation and the persisted model/encoder pair

use crate::data::{features_matrix, CustomerFeatures, RiskRow, FEATURE_COLUMNS};
use crate::error::PipelineError;
use crate::io::write_atomic;
use crate::risk::RiskLevel;
use anyhow::Context;
use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Bumped whenever the artifact layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Bidirectional mapping between labels and integer codes.
///
/// Classes are the sorted unique labels seen at fit time, so codes follow
/// the label type's `Ord`. For [`RiskLevel`] that is severity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder<L> {
    classes: Vec<L>,
}

impl<L: Ord + Clone + fmt::Display> LabelEncoder<L> {
    pub fn fit(labels: &[L]) -> Self {
        let mut classes = labels.to_vec();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    pub fn encode(&self, label: &L) -> Result<usize, PipelineError> {
        self.classes
            .binary_search(label)
            .map_err(|_| PipelineError::UnknownLabel(label.to_string()))
    }

    pub fn decode(&self, code: usize) -> Result<L, PipelineError> {
        self.classes
            .get(code)
            .cloned()
            .ok_or(PipelineError::UnknownCode(code))
    }

    pub fn transform(&self, labels: &[L]) -> Result<Array1<usize>, PipelineError> {
        labels.iter().map(|label| self.encode(label)).collect()
    }
}

/// Settings for the forest and the train/held-out split
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainParams {
    pub seed: u64,
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    /// Features drawn for each tree; all of them when `None`
    pub max_features: Option<usize>,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            seed: 42,
            test_size: 0.3,
            n_trees: 100,
            max_depth: None,
            max_features: None,
        }
    }
}

/// Shuffle row indices with a fixed seed and split them into
/// `(train, test)`. The test side gets `ceil(n * test_size)` rows but never
/// all of them.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64) * test_size.clamp(0.0, 1.0)).ceil() as usize;
    let n_test = n_test.min(n.saturating_sub(1));
    let train = indices.split_off(n_test);
    (train, indices)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestTree {
    /// Columns of the full feature matrix this tree was trained on
    features: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

/// Bootstrap-aggregated Gini decision trees with majority voting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<ForestTree>,
    n_classes: usize,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(
        records: &Array2<f64>,
        targets: &Array1<usize>,
        n_classes: usize,
        params: &TrainParams,
    ) -> crate::Result<Self> {
        let n_samples = records.nrows();
        let n_features = records.ncols();
        if n_samples == 0 {
            return Err(PipelineError::EmptyInput("training partition".to_string()).into());
        }

        let max_features = params
            .max_features
            .unwrap_or(n_features)
            .clamp(1, n_features.max(1));
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees.max(1) {
            let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();

            let mut features: Vec<usize> = (0..n_features).collect();
            if max_features < n_features {
                features.shuffle(&mut rng);
                features.truncate(max_features);
                features.sort_unstable();
            }

            let x = records.select(Axis(0), &rows).select(Axis(1), &features);
            let y = targets.select(Axis(0), &rows);
            let tree = DecisionTree::<f64, usize>::params()
                .max_depth(params.max_depth)
                .fit(&Dataset::new(x, y))?;

            trees.push(ForestTree { features, tree });
        }

        Ok(Self {
            trees,
            n_classes,
            n_features,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Majority vote over all trees; ties go to the lowest code
    pub fn predict(&self, records: &Array2<f64>) -> Array1<usize> {
        let mut votes = Array2::<usize>::zeros((records.nrows(), self.n_classes.max(1)));

        for member in &self.trees {
            let x = records.select(Axis(1), &member.features);
            let predicted: Array1<usize> = member.tree.predict(&x);
            for (row, &class) in predicted.iter().enumerate() {
                if class < votes.ncols() {
                    votes[[row, class]] += 1;
                }
            }
        }

        votes
            .outer_iter()
            .map(|row| {
                let mut best = 0;
                for (class, &count) in row.iter().enumerate() {
                    if count > row[best] {
                        best = class;
                    }
                }
                best
            })
            .collect()
    }
}

/// Precision, recall and F1 of one class (or an average of classes)
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Held-out evaluation of the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub classes: Vec<ClassMetrics>,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    /// Compare predicted codes with true codes; `class_names[code]` labels each class
    pub fn from_predictions(truth: &[usize], predicted: &[usize], class_names: &[String]) -> Self {
        let total = truth.len();
        let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
        let accuracy = ratio(correct, total);

        let classes: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(code, name)| {
                let tp = truth
                    .iter()
                    .zip(predicted)
                    .filter(|&(&t, &p)| t == code && p == code)
                    .count();
                let predicted_pos = predicted.iter().filter(|&&p| p == code).count();
                let support = truth.iter().filter(|&&t| t == code).count();

                let precision = ratio(tp, predicted_pos);
                let recall = ratio(tp, support);
                ClassMetrics {
                    label: name.clone(),
                    precision,
                    recall,
                    f1: f1(precision, recall),
                    support,
                }
            })
            .collect();

        let n = classes.len().max(1) as f64;
        let macro_avg = ClassMetrics {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };

        let weighted = |metric: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes
                    .iter()
                    .map(|c| metric(c) * c.support as f64)
                    .sum::<f64>()
                    / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            label: "weighted avg".to_string(),
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            support: total,
        };

        Self {
            accuracy,
            classes,
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>14} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for class in &self.classes {
            write_metrics_row(f, class)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_metrics_row(f, &self.macro_avg)?;
        write_metrics_row(f, &self.weighted_avg)
    }
}

fn write_metrics_row(f: &mut fmt::Formatter<'_>, m: &ClassMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        m.label, m.precision, m.recall, m.f1, m.support
    )
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Digest binding a feature list to a class list. Stored in both artifacts
/// so a model is never decoded with an encoder built for a different schema.
pub fn schema_fingerprint<S: AsRef<str>>(feature_names: &[S], classes: &[RiskLevel]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ARTIFACT_FORMAT_VERSION.to_le_bytes());
    for name in feature_names {
        hasher.update(name.as_ref().as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0xffu8]);
    for class in classes {
        hasher.update(class.as_str().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// What the classifier expects as input and produces as output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub n_classes: usize,
    pub fingerprint: String,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: ModelSchema,
    pub forest: RandomForest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderArtifact {
    pub format_version: u32,
    pub fingerprint: String,
    pub encoder: LabelEncoder<RiskLevel>,
}

/// Result of one training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: ModelArtifact,
    pub encoder: EncoderArtifact,
    pub report: ClassificationReport,
    pub n_train: usize,
    pub n_test: usize,
}

impl TrainingOutcome {
    /// Persist the model and the encoder as two files
    pub fn save(&self, model_path: &Path, encoder_path: &Path) -> crate::Result<()> {
        write_json(model_path, &self.model)?;
        write_json(encoder_path, &self.encoder)?;
        info!(
            model = %model_path.display(),
            encoder = %encoder_path.display(),
            fingerprint = %self.model.schema.fingerprint,
            "classifier artifacts saved"
        );
        Ok(())
    }
}

/// Encode risk labels, train on a seeded 70/30 split and evaluate on the
/// held-out rows. Training succeeds whatever the accuracy.
pub fn train_risk_classifier(rows: &[RiskRow], params: &TrainParams) -> crate::Result<TrainingOutcome> {
    if rows.is_empty() {
        return Err(PipelineError::EmptyInput("risk table".to_string()).into());
    }

    let labels: Vec<RiskLevel> = rows.iter().map(|r| r.risk_level).collect();
    let encoder = LabelEncoder::fit(&labels);
    let targets = encoder.transform(&labels)?;
    let records = features_matrix(rows.iter().map(|r| &r.features));

    let (train_idx, test_idx) = train_test_split(rows.len(), params.test_size, params.seed);
    if test_idx.is_empty() {
        warn!(rows = rows.len(), "held-out partition is empty; report will be blank");
    }

    let x_train = records.select(Axis(0), &train_idx);
    let y_train = targets.select(Axis(0), &train_idx);
    let forest = RandomForest::fit(&x_train, &y_train, encoder.classes().len(), params)?;

    let x_test = records.select(Axis(0), &test_idx);
    let y_test = targets.select(Axis(0), &test_idx);
    let predicted = forest.predict(&x_test);

    let class_names: Vec<String> = encoder.classes().iter().map(|c| c.to_string()).collect();
    let report = ClassificationReport::from_predictions(
        &y_test.to_vec(),
        &predicted.to_vec(),
        &class_names,
    );

    let feature_names: Vec<String> = FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect();
    let fingerprint = schema_fingerprint(&feature_names, encoder.classes());
    info!(
        train = train_idx.len(),
        test = test_idx.len(),
        trees = forest.n_trees(),
        accuracy = report.accuracy,
        "classifier trained"
    );

    Ok(TrainingOutcome {
        model: ModelArtifact {
            schema: ModelSchema {
                format_version: ARTIFACT_FORMAT_VERSION,
                feature_names,
                n_classes: encoder.classes().len(),
                fingerprint: fingerprint.clone(),
                trained_at: Utc::now(),
            },
            forest,
        },
        encoder: EncoderArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            fingerprint,
            encoder,
        },
        report,
        n_train: train_idx.len(),
        n_test: test_idx.len(),
    })
}

/// A model and encoder that were verified to belong together
#[derive(Debug, Clone)]
pub struct RiskPredictor {
    model: ModelArtifact,
    encoder: EncoderArtifact,
}

impl RiskPredictor {
    pub fn load(model_path: &Path, encoder_path: &Path) -> crate::Result<Self> {
        let model: ModelArtifact = read_json(model_path)?;
        let encoder: EncoderArtifact = read_json(encoder_path)?;
        Ok(Self::from_artifacts(model, encoder)?)
    }

    pub fn from_artifacts(model: ModelArtifact, encoder: EncoderArtifact) -> Result<Self, PipelineError> {
        check_compatibility(&model, &encoder)?;
        Ok(Self { model, encoder })
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.model.schema
    }

    pub fn predict(&self, features: &CustomerFeatures) -> crate::Result<RiskLevel> {
        let x = Array2::from_shape_vec((1, FEATURE_COLUMNS.len()), features.to_vector().to_vec())?;
        let code = self.model.forest.predict(&x)[0];
        Ok(self.encoder.encoder.decode(code)?)
    }
}

fn check_compatibility(model: &ModelArtifact, encoder: &EncoderArtifact) -> Result<(), PipelineError> {
    let schema = &model.schema;
    let mismatch = |msg: String| Err(PipelineError::SchemaMismatch(msg));

    if schema.format_version != ARTIFACT_FORMAT_VERSION || encoder.format_version != ARTIFACT_FORMAT_VERSION {
        return mismatch(format!(
            "artifact format versions {}/{} (expected {})",
            schema.format_version, encoder.format_version, ARTIFACT_FORMAT_VERSION
        ));
    }
    if schema.feature_names != FEATURE_COLUMNS {
        return mismatch(format!(
            "model expects features {:?}, pipeline produces {:?}",
            schema.feature_names, FEATURE_COLUMNS
        ));
    }
    if model.forest.n_features() != schema.feature_names.len() {
        return mismatch("forest width differs from its feature list".to_string());
    }
    if schema.fingerprint != encoder.fingerprint {
        return mismatch("model and encoder were trained on different schemas".to_string());
    }
    if schema_fingerprint(&schema.feature_names, encoder.encoder.classes()) != encoder.fingerprint {
        return mismatch("encoder classes do not match their fingerprint".to_string());
    }
    if schema.n_classes != encoder.encoder.classes().len() {
        return mismatch(format!(
            "model has {} classes, encoder has {}",
            schema.n_classes,
            encoder.encoder.classes().len()
        ));
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> crate::Result<()> {
    write_atomic(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> crate::Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("decoding {}", path.display()))
}
