use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod config;
mod engine;
mod handler;
mod http;
mod logger;
mod provision;
mod script;
mod server;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::Config::load()?;
    logger::init(&cfg.logging)?;

    // Worker count from configuration, CPU cores otherwise
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let listener = server::create_reusable_listener(addr)?;

    let host = script::ScriptHost::start(cfg.script_options())?;
    let engine = engine::Engine::new(Arc::new(host)).with_provisioner(cfg.provisioner());
    let state = Arc::new(config::AppState::new(&cfg, engine));

    let signals = Arc::new(server::SignalHandler::new());
    server::start_signal_handler(Arc::clone(&signals));

    logger::log_server_start(&addr, &cfg);

    // Use LocalSet for spawn_local support
    let local = tokio::task::LocalSet::new();
    local
        .run_until(server::start_server_loop(
            listener,
            state,
            Arc::new(AtomicUsize::new(0)),
            Arc::clone(&signals.shutdown),
        ))
        .await?;

    if signals.shutdown_requested.load(Ordering::SeqCst) {
        tracing::info!("Shutdown complete");
    }
    Ok(())
}
