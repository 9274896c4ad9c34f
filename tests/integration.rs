//! Integration tests for RiskForge

use riskforge::{
    fit_risk_clusters, load_and_process_data, read_risk_table, train_risk_classifier,
    write_risk_table, AppContext, ClusterParams, PipelineConfig, PipelineError,
    PredictionOutcome, RiskLevel, TrainParams,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

const HEADER: &str = "customerID,invoiceNumber,InvoiceDate,InvoiceAmount,DaysLate,Disputed";

/// Three behavioural groups: prompt payers, occasional late payers and
/// chronic late payers with disputes
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();

    let mut invoice = 1000;
    for c in 0..8 {
        for k in 0..6 {
            invoice += 1;
            let late = (c + k) % 3;
            writeln!(file, "P-{c:02},{invoice},2013-0{}-1{k},{}.50,{late},No", k + 1, 40 + c * 2).unwrap();
        }
    }
    for c in 0..8 {
        for k in 0..4 {
            invoice += 1;
            let late = 12 + (c + k) % 6;
            let disputed = if k == 0 { "Yes" } else { "No" };
            writeln!(file, "M-{c:02},{invoice},{}/5/2013,{}.25,{late},{disputed}", k + 2, 65 + c).unwrap();
        }
    }
    for c in 0..8 {
        for k in 0..3 {
            invoice += 1;
            let late = 35 + (c * 3 + k) % 10;
            let disputed = if k < 2 { "Yes" } else { "No" };
            writeln!(file, "H-{c:02},{invoice},2012-1{k}-20,{}.75,{late},{disputed}", 90 + c * 3).unwrap();
        }
    }
    file
}

fn mean_late_by_level(levels: &[RiskLevel], late: &[f64]) -> HashMap<RiskLevel, f64> {
    let mut sums: HashMap<RiskLevel, (f64, usize)> = HashMap::new();
    for (level, &l) in levels.iter().zip(late) {
        let entry = sums.entry(*level).or_insert((0.0, 0));
        entry.0 += l;
        entry.1 += 1;
    }
    sums.into_iter().map(|(k, (s, n))| (k, s / n as f64)).collect()
}

fn run_pipeline(invoices: &Path, dir: &Path) -> PipelineConfig {
    let config = PipelineConfig {
        invoices_path: invoices.to_path_buf(),
        risk_table_path: dir.join("outputs/customer_risk_clusters.csv"),
        distribution_chart_path: dir.join("outputs/risk_cluster_distribution.png"),
        model_path: dir.join("models/risk_classifier.json"),
        encoder_path: dir.join("models/risk_label_encoder.json"),
        plots_dir: dir.join("static/plots"),
        customer_charts_dir: dir.join("static/customer_charts"),
    };

    let table = load_and_process_data(&config.invoices_path).unwrap();
    let clustering = fit_risk_clusters(&table, &ClusterParams::default()).unwrap();
    write_risk_table(&config.risk_table_path, &clustering.risk_table(&table)).unwrap();

    let risk_table = read_risk_table(&config.risk_table_path).unwrap();
    let outcome = train_risk_classifier(&risk_table.rows, &TrainParams::default()).unwrap();
    outcome.save(&config.model_path, &config.encoder_path).unwrap();
    config
}

#[test]
fn test_one_row_per_customer() {
    let test_file = create_test_csv();
    let table = load_and_process_data(test_file.path()).unwrap();

    assert_eq!(table.len(), 24);
    let mut ids: Vec<&str> = table.customers.iter().map(|c| c.customer_id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 24);

    for c in &table.customers {
        let expected = match &c.customer_id[..1] {
            "P" => 6,
            "M" => 4,
            _ => 3,
        };
        assert_eq!(c.total_invoices, expected, "{}", c.customer_id);
    }
}

#[test]
fn test_feature_consistency() {
    let test_file = create_test_csv();
    let table = load_and_process_data(test_file.path()).unwrap();

    for c in &table.customers {
        let expected_total = c.avg_days_late * c.total_invoices as f64;
        assert!((c.total_days_late - expected_total).abs() < 1e-9);
        assert!(c.max_days_late >= c.avg_days_late);
        assert!(c.total_disputes <= c.total_invoices);
    }
}

#[test]
fn test_risk_tiers_are_monotonic_for_any_seed() {
    let test_file = create_test_csv();
    let table = load_and_process_data(test_file.path()).unwrap();

    for seed in [0, 1, 42, 1234] {
        let params = ClusterParams {
            seed,
            ..ClusterParams::default()
        };
        let clustering = fit_risk_clusters(&table, &params).unwrap();
        let means = mean_late_by_level(&clustering.risk_levels(), &table.avg_days_late());

        let low = means[&RiskLevel::Low];
        let medium = means[&RiskLevel::Medium];
        let high = means[&RiskLevel::High];
        assert!(low <= medium && medium <= high, "seed {seed}: {low} {medium} {high}");
    }
}

#[test]
fn test_clustering_is_deterministic() {
    let test_file = create_test_csv();
    let table = load_and_process_data(test_file.path()).unwrap();

    let first = fit_risk_clusters(&table, &ClusterParams::default()).unwrap();
    let second = fit_risk_clusters(&table, &ClusterParams::default()).unwrap();
    assert_eq!(first.risk_levels(), second.risk_levels());
}

#[test]
fn test_three_customer_scenario() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    writeln!(file, "EARLY,1,2013-01-01,100.0,1,No").unwrap();
    writeln!(file, "EARLY,2,2013-02-01,120.0,3,No").unwrap();
    writeln!(file, "MIDDLE,3,2013-01-05,300.0,10,No").unwrap();
    writeln!(file, "MIDDLE,4,2013-02-05,280.0,20,Yes").unwrap();
    writeln!(file, "LATE,5,2013-01-09,50.0,35,Yes").unwrap();
    writeln!(file, "LATE,6,2013-02-09,70.0,45,Yes").unwrap();
    writeln!(file, "LATE,7,2013-03-09,60.0,40,No").unwrap();

    let table = load_and_process_data(file.path()).unwrap();
    let late: Vec<f64> = table.avg_days_late();
    assert_eq!(late, vec![2.0, 40.0, 15.0]);

    let clustering = fit_risk_clusters(&table, &ClusterParams::default()).unwrap();
    let levels = clustering.risk_levels();
    assert_eq!(levels, vec![RiskLevel::Low, RiskLevel::High, RiskLevel::Medium]);
}

#[test]
fn test_missing_column_aborts() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "customerID,invoiceNumber,InvoiceDate,InvoiceAmount,Disputed").unwrap();
    writeln!(file, "A,1,2013-01-01,10.0,No").unwrap();

    let err = load_and_process_data(file.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingColumns { .. })
    ));
}

#[test]
fn test_risk_table_round_trip() {
    let test_file = create_test_csv();
    let dir = tempdir().unwrap();
    let table = load_and_process_data(test_file.path()).unwrap();
    let clustering = fit_risk_clusters(&table, &ClusterParams::default()).unwrap();
    let risk_table = clustering.risk_table(&table);
    let path = dir.path().join("customer_risk_clusters.csv");

    write_risk_table(&path, &risk_table).unwrap();

    let header = std::fs::read_to_string(&path).unwrap();
    assert!(header.starts_with(
        "customerID,total_invoices,avg_days_late,max_days_late,total_days_late,avg_invoice_amount,total_disputes,risk_cluster,risk_level"
    ));

    let loaded = read_risk_table(&path).unwrap();
    assert_eq!(loaded.len(), risk_table.len());
    for (a, b) in loaded.rows.iter().zip(&risk_table.rows) {
        assert_eq!(a.features.customer_id, b.features.customer_id);
        assert_eq!(a.risk_level, b.risk_level);
        assert_eq!(a.risk_cluster, b.risk_cluster);
        assert!((a.features.avg_invoice_amount - b.features.avg_invoice_amount).abs() < 1e-6);
    }
}

#[test]
fn test_end_to_end_prediction() {
    let test_file = create_test_csv();
    let dir = tempdir().unwrap();
    let config = run_pipeline(test_file.path(), dir.path());

    let ctx = AppContext::load(config).unwrap();
    assert_eq!(ctx.risk_levels(), RiskLevel::ALL.to_vec());

    let high = ctx.dashboard(Some(RiskLevel::High));
    assert!(!high.is_empty());
    assert!(high.iter().all(|row| row.features.customer_id.starts_with('H')));
    assert_eq!(ctx.dashboard(None).len(), 24);

    match ctx.predict("  H-03 ").unwrap() {
        PredictionOutcome::Predicted(prediction) => {
            assert_eq!(prediction.customer_id, "H-03");
            assert_eq!(prediction.risk_level, RiskLevel::High);
            let chart = prediction.chart_path.expect("history chart");
            assert!(chart.exists());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_unknown_customer_is_not_found() {
    let test_file = create_test_csv();
    let dir = tempdir().unwrap();
    let config = run_pipeline(test_file.path(), dir.path());
    let ctx = AppContext::load(config).unwrap();

    let outcome = ctx.predict("NOPE-123").unwrap();
    assert_eq!(outcome, PredictionOutcome::NotFound("NOPE-123".to_string()));
    assert_eq!(outcome.to_string(), "Customer ID 'NOPE-123' not found.");
}

#[test]
fn test_reload_refuses_mismatched_artifacts() {
    let test_file = create_test_csv();
    let dir = tempdir().unwrap();
    let config = run_pipeline(test_file.path(), dir.path());
    let mut ctx = AppContext::load(config.clone()).unwrap();

    // encoder from a run that only saw two tiers
    let risk_table = read_risk_table(&config.risk_table_path).unwrap();
    let two_tier: Vec<_> = risk_table
        .rows
        .into_iter()
        .filter(|row| row.risk_level != RiskLevel::Medium)
        .collect();
    let other = train_risk_classifier(&two_tier, &TrainParams::default()).unwrap();
    let stray_model = dir.path().join("stray_model.json");
    other.save(&stray_model, &config.encoder_path).unwrap();

    let err = ctx.reload().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::SchemaMismatch(_))
    ));

    // the context keeps serving the artifacts it already had
    assert_eq!(ctx.dashboard(None).len(), 24);
}

#[test]
fn test_leading_zero_ids_survive_the_pipeline() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    let mut invoice = 0;
    for (id, late) in [("0379", 1), ("0412", 2), ("379", 3), ("0555", 20), ("0601", 22), ("0777", 45), ("0801", 48)] {
        for k in 0..3 {
            invoice += 1;
            writeln!(file, "{id},{invoice:05},2013-0{}-15,{}.00,{},No", k + 1, 50 + late, late + k).unwrap();
        }
    }

    let table = load_and_process_data(file.path()).unwrap();
    let ids: Vec<&str> = table.customers.iter().map(|c| c.customer_id.as_str()).collect();
    assert_eq!(ids, vec!["0379", "0412", "0555", "0601", "0777", "0801", "379"]);

    let dir = tempdir().unwrap();
    let config = run_pipeline(file.path(), dir.path());
    let risk_table = read_risk_table(&config.risk_table_path).unwrap();
    assert!(risk_table.find("0379").is_some());
    assert!(risk_table.find("379").is_some());
    assert_eq!(risk_table.len(), 7);

    let ctx = AppContext::load(config).unwrap();
    match ctx.predict("0379").unwrap() {
        PredictionOutcome::Predicted(prediction) => {
            assert_eq!(prediction.customer_id, "0379");
            assert_eq!(prediction.clustered_level, RiskLevel::Low);
            assert!(prediction.chart_path.is_some());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
