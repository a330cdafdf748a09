use anyhow::{Context, Result};
use dsse_algo::ErrorTable;
use dsse_cli::AnalyzeArgs;
use dsse_federate::{analyze_recordings, read_recording};

pub fn handle(args: &AnalyzeArgs) -> Result<()> {
    let load = |path: &std::path::Path| {
        read_recording(path).with_context(|| format!("reading recording {}", path.display()))
    };
    let table = analyze_recordings(
        &load(&args.truth_real)?,
        &load(&args.truth_imag)?,
        &load(&args.magnitude)?,
        &load(&args.angle)?,
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        print_table(&table);
    }
    Ok(())
}

fn print_table(table: &ErrorTable) {
    println!("{:<20} {:>12} {:>12} {:>6}", "time", "MAPE (%)", "MAE (deg)", "nodes");
    for row in &table.rows {
        let time = row
            .time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{time:<20} {:>12.6} {:>12.6} {:>6}",
            row.errors.mape_percent, row.errors.mae_degrees, row.errors.nodes_compared
        );
    }
    println!(
        "overall MAPE {:.6} %, MAE {:.6} deg over {} ticks",
        table.overall.mape_percent,
        table.overall.mae_degrees,
        table.rows.len()
    );
}
