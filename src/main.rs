//! RiskForge: accounts-receivable risk triage CLI
//!
//! Entry point that runs the clustering and training stages and answers
//! dashboard and prediction queries against their outputs.

use anyhow::Result;
use clap::Parser;
use riskforge::cli::{Args, ClusterArgs, Command, TrainArgs};
use riskforge::{
    fit_risk_clusters, load_and_process_data, read_risk_table, train_risk_classifier, viz,
    write_risk_table, AppContext, PipelineConfig, PredictionOutcome, RiskLevel,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.verbose { "riskforge=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = args.config();

    match &args.command {
        Command::Cluster(cluster) => run_cluster_stage(&args, &config, cluster),
        Command::Train(train) => run_train_stage(&args, &config, train),
        Command::Run { cluster, train } => {
            let start_time = Instant::now();
            run_cluster_stage(&args, &config, cluster)?;
            run_train_stage(&args, &config, train)?;
            println!("\n=== Pipeline Complete ===");
            println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
            Ok(())
        }
        Command::Plot { output } => run_plot(&config, output.clone()),
        Command::Dashboard { risk } => run_dashboard(config, *risk),
        Command::Predict { customer_id } => run_predict(config, customer_id),
    }
}

/// Aggregate, cluster, persist the risk table and draw the tier chart
fn run_cluster_stage(args: &Args, config: &PipelineConfig, cluster: &ClusterArgs) -> Result<()> {
    println!("=== Risk Clustering ===\n");
    let start_time = Instant::now();

    if args.verbose {
        println!("Step 1: Aggregating invoices");
        println!("  Input file: {}", config.invoices_path.display());
    }
    let table = load_and_process_data(&config.invoices_path)?;
    println!("✓ Features computed: {} customers", table.len());

    let params = cluster.params(args.seed);
    if args.verbose {
        println!("\nStep 2: Fitting K-Means");
        println!("  Seed: {}", params.seed);
        println!("  Initializations: {}", params.n_runs);
        println!("  Max iterations: {}", params.max_iters);
        println!("  Tolerance: {}", params.tolerance);
    }
    let clustering = fit_risk_clusters(&table, &params)?;
    viz::print_cluster_statistics(&table, &clustering);

    let risk_table = clustering.risk_table(&table);
    write_risk_table(&config.risk_table_path, &risk_table)?;
    println!("\n✓ Saved customer risk data to {}", config.risk_table_path.display());

    viz::create_risk_distribution_chart(&risk_table.risk_levels(), &config.distribution_chart_path)?;
    println!("✓ Distribution chart saved to {}", config.distribution_chart_path.display());

    println!("\nSample Output:");
    viz::print_sample_rows(&risk_table, 5);

    if args.verbose {
        println!("\nClustering time: {:.2}s", start_time.elapsed().as_secs_f64());
    }
    Ok(())
}

/// Train, report and persist the classifier with its label encoder
fn run_train_stage(args: &Args, config: &PipelineConfig, train: &TrainArgs) -> Result<()> {
    println!("\n=== Risk Classifier Training ===\n");
    let start_time = Instant::now();

    let table = read_risk_table(&config.risk_table_path)?;
    let params = train.params(args.seed);
    if args.verbose {
        println!("  Input file: {}", config.risk_table_path.display());
        println!("  Trees: {}", params.n_trees);
        println!("  Held-out fraction: {}", params.test_size);
    }

    let outcome = train_risk_classifier(&table.rows, &params)?;
    println!(
        "✓ Trained on {} customers, evaluated on {}",
        outcome.n_train, outcome.n_test
    );
    println!("✓ Accuracy: {:.4}", outcome.report.accuracy);
    println!("Classification Report:");
    println!("{}", outcome.report);

    outcome.save(&config.model_path, &config.encoder_path)?;
    println!("✓ Model saved as: {}", config.model_path.display());
    println!("✓ Label encoder saved as: {}", config.encoder_path.display());

    if args.verbose {
        println!("\nTraining time: {:.2}s", start_time.elapsed().as_secs_f64());
    }
    Ok(())
}

/// Redraw the distribution chart from the persisted table
fn run_plot(config: &PipelineConfig, output: Option<PathBuf>) -> Result<()> {
    let table = read_risk_table(&config.risk_table_path)?;
    let output = output.unwrap_or_else(|| config.static_distribution_chart_path());
    viz::create_risk_distribution_chart(&table.risk_levels(), &output)?;
    println!("✓ Distribution chart saved to {}", output.display());
    Ok(())
}

fn run_dashboard(config: PipelineConfig, risk: Option<RiskLevel>) -> Result<()> {
    let ctx = AppContext::load(config)?;
    let rows = ctx.dashboard(risk);

    let available: Vec<String> = ctx.risk_levels().iter().map(|l| l.to_string()).collect();
    println!("Risk levels: {}", available.join(", "));
    if let Some(level) = risk {
        println!("Filter: {level}");
    }
    println!();
    viz::print_risk_rows(rows.iter().copied());
    println!("\n{} customers", rows.len());
    Ok(())
}

fn run_predict(config: PipelineConfig, customer_id: &str) -> Result<()> {
    let ctx = AppContext::load(config)?;

    match ctx.predict(customer_id) {
        Ok(PredictionOutcome::Predicted(prediction)) => {
            println!("Customer: {}", prediction.customer_id);
            println!("Predicted risk: {}", prediction.risk_level);
            println!("Cluster tier:   {}", prediction.clustered_level);
            match prediction.chart_path {
                Some(path) => println!("History chart:  {}", path.display()),
                None => println!("History chart:  (no invoices on file)"),
            }
        }
        Ok(outcome @ PredictionOutcome::NotFound(_)) => println!("❌ {outcome}"),
        Err(err) => println!("Error: {err:#}"),
    }
    Ok(())
}
