//! Capture-session walkthrough: export layout, batch appends, raw slices,
//! metadata records and reads.
//!
//! Run: RUST_LOG=debug cargo run --example capture_session

use anyhow::Context;
use tempfile::TempDir;
use tracestore::{ArrayCreateParams, ElementType, Extent, ExportTarget, SampleType, Session, StoreOptions};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== tracestore - capture session ===\n");

    let dir = TempDir::new()?;
    let path = dir.path().join("capture.trc");
    let mut session = Session::with_options(StoreOptions::from_env());
    session.create_new(&path).context("creating container")?;

    println!("1. Export structure for two channels...");
    let targets = [ExportTarget::for_channel(1), ExportTarget::for_channel(2)];
    let report = session.ensure_export_structure(&targets, 512, SampleType::Real32)?;
    println!("   {}", report);
    for created in &report.created {
        println!("   + {}", created);
    }

    println!("\n2. Appending captured traces...");
    for (run, target) in targets.iter().enumerate() {
        let traces: Vec<Vec<f32>> = (0..8)
            .map(|t| (0..512).map(|i| ((i + t * 7) as f32 * 0.02 + run as f32).sin()).collect())
            .collect();
        let summary = session.append_trace_batch::<f32, _>(target, &traces, "2025-01-01T00:00:00Z", "{\"vdiv\":0.5}")?;
        println!(
            "   {}: traces {}..{} (record #{})",
            summary.traces,
            summary.first_trace,
            summary.first_trace + summary.trace_count,
            summary.record_index
        );
    }

    println!("\n3. Reserving rows and filling them one at a time...");
    {
        let mut appender = session.appender("/ch1/traces", 512, SampleType::Real32, 4)?;
        for t in 0..3 {
            appender.write(&vec![t as f32; 512])?;
        }
        println!("   wrote {} of 4 reserved rows", appender.handle().rows_written());
    }
    println!("   /ch1/traces is now {:?}", session.describe("/ch1/traces")?.dims);

    println!("\n4. Raw slice append into a 1-D log...");
    session.create_array(
        &ArrayCreateParams::new("/log/adc", ElementType::UInt16)
            .dims(vec![0], vec![Extent::Unlimited])
            .chunks(vec![256])
            .compression(3),
    )?;
    let payload: Vec<u8> = (0..1000u16).flat_map(|v| v.to_le_bytes()).collect();
    let summary = session.append_raw_slice("/log/adc", &payload, 200, 1600, 0, "uint16")?;
    println!("{}", summary);

    println!("\n5. Reading back...");
    let out = session.read_linear("/log/adc", 0, 4)?;
    println!("   {} -> {:?}", out, out.to_vec::<u16>()?);
    let out = session.read_rect("/ch2/traces", 7, 1, 0, 4)?;
    println!("   {} -> {:?}", out, out.to_vec::<f32>()?);
    for record in session.read_metadata_records("/ch1/runs")? {
        println!("   run: {:?}", record);
    }

    session.close()?;
    println!("\nContainer written to {} ({} bytes)", path.display(), std::fs::metadata(&path)?.len());
    Ok(())
}
