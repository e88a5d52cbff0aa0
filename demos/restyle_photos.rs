//! Restyle a few photos with Gemini and assemble them into an animated GIF.
//!
//! Needs `GEMINI_API_KEY` (or `API_KEY`) in the environment.
//!
//! ```sh
//! cargo run --example restyle_photos -- popart a.jpg b.jpg out.gif
//! ```

use restyle_pipeline::{
    GeminiConfig, GeminiService, JobEvent, PipelineConfig, RestylePipeline, StyleCatalog,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("restyle_pipeline=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: restyle_photos <style> <photo>... <out.gif>");
        return Ok(());
    }
    let (style, rest) = args.split_first().ok_or("missing style")?;
    let (out, photos) = rest.split_last().ok_or("missing output path")?;

    let service = GeminiService::new(GeminiConfig::from_env()?);
    let config = PipelineConfig::builder()
        .with_concurrency(2)
        .with_base_backoff(Duration::from_secs(2))
        .build();
    let pipeline = RestylePipeline::new(service, config, StyleCatalog::default());

    println!("Styles:");
    for s in pipeline.catalog().styles() {
        println!("  {:<12} {}", s.key, s.name);
    }
    pipeline.set_style(style)?;

    let mut events = pipeline.subscribe_events();
    for path in photos {
        let bytes = tokio::fs::read(path).await?;
        let id = pipeline.submit(bytes.into())?;
        println!("Submitted {} as {}", path, id);
    }

    let mut finished = 0;
    while finished < photos.len() {
        let event = events.recv().await?;
        match &event {
            JobEvent::Completed { job_id } => println!("  {} done", job_id),
            JobEvent::Failed { job_id, message, .. } => eprintln!("  {} failed: {}", job_id, message),
            _ => {}
        }
        if event.is_terminal() {
            finished += 1;
        }
    }

    let state = pipeline.read();
    if state.completed_count() == 0 {
        eprintln!("Nothing to animate");
        return Ok(());
    }

    let artifact = pipeline.build_batch().await?;
    tokio::fs::write(out, &artifact.bytes).await?;
    println!(
        "Wrote {} ({} frames, {} bytes)",
        out,
        artifact.frame_count,
        artifact.bytes.len()
    );

    Ok(())
}
