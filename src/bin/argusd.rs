//! argusd - streaming frame analysis daemon
//!
//! This daemon:
//! 1. Loads layered configuration (JSON file + ARGUS_* environment)
//! 2. Opens the artifact trees and trains recognition state from the
//!    persisted face corpus
//! 3. Serves the ingestion/retrieval API, one thread per connection
//! 4. Dispatches extracted frames through the bounded pipeline
//! 5. Drains the visible backlog before exiting on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argus_stream::analysis::providers::ProviderSet;
use argus_stream::api::{ApiConfig, ApiServer};
use argus_stream::pipeline::bootstrap_pipeline;
use argus_stream::{StreamService, StreamerConfig};

#[derive(Parser, Debug)]
#[command(name = "argusd", about = "Streaming JPEG frame analysis daemon")]
struct Args {
    /// JSON config file; ARGUS_* environment variables override its fields
    #[arg(long, env = "ARGUS_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address override for the ingestion API
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = StreamerConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.api_addr = addr;
    }

    let (pipeline, state, store) = bootstrap_pipeline(&cfg, ProviderSet::cpu_defaults())?;
    log::info!(
        "face corpus at {}, motion snapshots at {}",
        store.face_root().display(),
        store.motion_root().display()
    );
    {
        let state = state
            .lock()
            .map_err(|_| anyhow::anyhow!("recognition state lock poisoned"))?;
        log::info!(
            "recognizer trained={} last_identity={}",
            state.is_trained(),
            state.last_identity()
        );
    }

    let service = Arc::new(StreamService::new(
        Arc::clone(&pipeline),
        cfg.max_pending_bytes,
    ));
    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        service,
    )
    .spawn()?;
    log::info!("argusd listening on {}", api_handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down; draining queued frames");
    api_handle.stop()?;
    if !pipeline.wait_idle(Duration::from_secs(10)) {
        log::warn!(
            "exiting with {} frame(s) still queued",
            pipeline.queue_len()
        );
    }
    log::info!("argusd stopped ({} snapshot(s) retained)", pipeline.result_count());
    Ok(())
}
