//! Charts and console summaries using Plotters

use crate::data::{FeatureTable, InvoicePoint, RiskTable};
use crate::io::ensure_parent_dir;
use crate::model::RiskClustering;
use crate::risk::RiskLevel;
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

/// Bar colour per tier, in [`RiskLevel::ALL`] order
const TIER_COLORS: [RGBColor; 3] = [
    RGBColor(76, 153, 76),
    RGBColor(230, 160, 40),
    RGBColor(200, 60, 50),
];

/// Count customers per tier, in [`RiskLevel::ALL`] order
pub fn tier_counts(levels: &[RiskLevel]) -> [usize; 3] {
    let mut counts = [0; 3];
    for level in levels {
        counts[*level as usize] += 1;
    }
    counts
}

/// Bar chart of customer count per risk tier, categories always in
/// Low / Medium / High order
pub fn create_risk_distribution_chart(levels: &[RiskLevel], output_path: &Path) -> crate::Result<()> {
    ensure_parent_dir(output_path)?;
    let counts = tier_counts(levels);
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1) as f64;

    let root = BitMapBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customer Count per Risk Group", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..2.5f64, 0f64..(max_count * 1.1))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(3)
        .x_label_formatter(&|x| tier_axis_label(*x))
        .x_desc("Risk Level")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, &count) in counts.iter().enumerate() {
        let x = i as f64;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.4, 0.0), (x + 0.4, count as f64)],
            TIER_COLORS[i].filled(),
        )))?;
    }

    root.present()?;
    info!(path = %output_path.display(), "risk distribution chart saved");
    Ok(())
}

fn tier_axis_label(x: f64) -> String {
    let nearest = x.round();
    if (x - nearest).abs() > 0.05 || !(0.0..=2.0).contains(&nearest) {
        return String::new();
    }
    RiskLevel::ALL[nearest as usize].to_string()
}

/// Line chart of days late per invoice over time for one customer
pub fn create_customer_history_chart(
    customer_id: &str,
    history: &[InvoicePoint],
    output_path: &Path,
) -> crate::Result<()> {
    let Some(first) = history.first() else {
        anyhow::bail!("no invoice history for customer '{customer_id}'");
    };
    ensure_parent_dir(output_path)?;

    let start = first.date;
    let points: Vec<(f64, f64)> = history
        .iter()
        .map(|p| ((p.date - start).num_days() as f64, p.days_late))
        .collect();

    let x_max = points.last().map(|p| p.0).unwrap_or(0.0).max(1.0);
    let y_min = points.iter().map(|p| p.1).fold(0.0, f64::min);
    let y_max = points.iter().map(|p| p.1).fold(1.0, f64::max);
    let y_pad = (y_max - y_min) * 0.1;

    let root = BitMapBackend::new(output_path, (800, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Days Late Over Time: {customer_id}"), ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(x_max + 0.5), (y_min - y_pad)..(y_max + y_pad))?;

    chart
        .configure_mesh()
        .x_labels(6)
        .x_label_formatter(&|x| {
            (start + chrono::Duration::days(x.round() as i64))
                .format("%Y-%m-%d")
                .to_string()
        })
        .x_desc("Invoice Date")
        .y_desc("Days Late")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(
        points
            .iter()
            .map(|&point| Circle::new(point, 4, BLUE.filled())),
    )?;

    root.present()?;
    info!(path = %output_path.display(), customer_id, "customer history chart saved");
    Ok(())
}

/// Print cluster statistics to console
pub fn print_cluster_statistics(table: &FeatureTable, clustering: &RiskClustering) {
    let total = table.len();
    println!("\n=== Cluster Statistics ===");
    println!("Total customers: {}", total);
    println!("Within-cluster sum of squares (Inertia): {:.2}", clustering.inertia);

    let silhouette_score = clustering.compute_silhouette_sample(100);
    println!("Silhouette score (sample): {:.3}", silhouette_score);

    println!("\nClusters:");
    let sizes = clustering.cluster_sizes();
    for (cluster, &size) in sizes.iter().enumerate() {
        let percentage = (size as f64 / total.max(1) as f64) * 100.0;
        println!(
            "  Cluster {} -> {:<11}: {} customers ({:.1}%)",
            cluster, clustering.tier_of_cluster[cluster], size, percentage
        );
    }
}

/// Print the first `n` rows of the risk table
pub fn print_sample_rows(table: &RiskTable, n: usize) {
    println!(
        "{:<14} {:>14} {:>13} {:>14} {:<11}",
        "customerID", "total_invoices", "avg_days_late", "total_disputes", "risk_level"
    );
    for row in table.rows.iter().take(n) {
        let f = &row.features;
        println!(
            "{:<14} {:>14} {:>13.2} {:>14} {:<11}",
            f.customer_id, f.total_invoices, f.avg_days_late, f.total_disputes, row.risk_level
        );
    }
}

/// Print every row of the risk table with all columns
pub fn print_risk_rows<'a, I>(rows: I)
where
    I: IntoIterator<Item = &'a crate::data::RiskRow>,
{
    println!(
        "{:<14} {:>8} {:>9} {:>9} {:>10} {:>11} {:>8} {:>7} {:<11}",
        "customerID", "invoices", "avg_late", "max_late", "total_late", "avg_amount", "disputes", "cluster", "risk_level"
    );
    for row in rows {
        let f = &row.features;
        println!(
            "{:<14} {:>8} {:>9.2} {:>9.0} {:>10.0} {:>11.2} {:>8} {:>7} {:<11}",
            f.customer_id,
            f.total_invoices,
            f.avg_days_late,
            f.max_days_late,
            f.total_days_late,
            f.avg_invoice_amount,
            f.total_disputes,
            row.risk_cluster,
            row.risk_level
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn test_tier_counts_fixed_order() {
        let levels = [RiskLevel::High, RiskLevel::Low, RiskLevel::High];
        assert_eq!(tier_counts(&levels), [1, 0, 2]);
    }

    #[test]
    fn test_tier_axis_label() {
        assert_eq!(tier_axis_label(0.0), "Low Risk");
        assert_eq!(tier_axis_label(2.0), "High Risk");
        assert_eq!(tier_axis_label(0.5), "");
        assert_eq!(tier_axis_label(-0.5), "");
    }

    #[test]
    fn test_create_risk_distribution_chart() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("plots/risk_cluster_distribution.png");
        let levels = [RiskLevel::Low, RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

        create_risk_distribution_chart(&levels, &output).unwrap();
        assert!(output.exists());
    }

    #[test]
    fn test_create_customer_history_chart() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("customer_charts/C1.png");
        let history = vec![
            InvoicePoint {
                date: NaiveDate::from_ymd_opt(2013, 1, 2).unwrap(),
                days_late: 0.0,
            },
            InvoicePoint {
                date: NaiveDate::from_ymd_opt(2013, 3, 15).unwrap(),
                days_late: 12.0,
            },
        ];

        create_customer_history_chart("C1", &history, &output).unwrap();
        assert!(output.exists());

        assert!(create_customer_history_chart("C1", &[], &output).is_err());
    }
}
