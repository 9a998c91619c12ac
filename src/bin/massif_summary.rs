use anyhow::{Context, Result};
use clap::Parser;
use prettytable::{row, Table};
use search_benchmark_rs::config::PlotBackend;
use search_benchmark_rs::massif;
use search_benchmark_rs::plot::{plotter_for, PlotRequest};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "massif_summary", about = "Prints and plots the heap series of one massif profile")]
struct Cli {
    /// Profiler output file
    profile: PathBuf,

    /// Render the series into this image file
    #[arg(short, long)]
    plot: Option<PathBuf>,

    /// Plot renderer
    #[arg(long, value_enum, default_value_t = PlotBackend::Svg)]
    backend: PlotBackend,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let content = fs::read_to_string(&cli.profile)
        .with_context(|| format!("cannot read {}", cli.profile.display()))?;
    let snapshots = massif::parse_str(&content);

    if let Some((start, end)) = massif::recover_endpoints(&content) {
        println!("Endpoints: {} -> {}", start, end);
    }

    // One row per snapshot, then the peak
    let mut table = Table::new();
    table.add_row(row!["Snapshot", "Time (s)", "Heap (MB)", "Heap extra (MB)"]);
    for (i, s) in snapshots.iter().enumerate() {
        table.add_row(row![
            i,
            format!("{:.3}", s.time),
            format!("{:.3}", s.heap_mb),
            format!("{:.3}", s.heap_extra_mb)
        ]);
    }
    table.printstd();

    if let Some(peak) = snapshots
        .iter()
        .max_by(|a, b| (a.heap_mb + a.heap_extra_mb).total_cmp(&(b.heap_mb + b.heap_extra_mb)))
    {
        println!(
            "Peak: {:.3} MB at {:.3}s over {} snapshots",
            peak.heap_mb + peak.heap_extra_mb,
            peak.time,
            snapshots.len()
        );
    }

    if let Some(output) = cli.plot {
        let title = cli
            .profile
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let request = PlotRequest {
            title: format!("Memory Usage Over Time for {}", title),
            snapshots,
            output,
        };
        plotter_for(cli.backend).render(&request)?;
        info!(path = %request.output.display(), "Plot written");
    }

    Ok(())
}
