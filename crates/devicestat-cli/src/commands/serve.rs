use std::sync::Arc;
use std::time::Duration;

use devicestat_server::routes::ROUTES;
use devicestat_server::{HttpServer, ServerConfig};

use crate::DeviceArgs;

pub struct ServeCommandConfig<'a> {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub timeout_secs: u64,
    pub device: &'a DeviceArgs,
}

pub fn run(cfg: ServeCommandConfig<'_>) {
    let config = ServerConfig {
        host: cfg.host,
        port: cfg.port,
        workers: cfg.workers,
        request_timeout: Duration::from_secs(cfg.timeout_secs),
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }
    let monitor = Arc::new(super::make_monitor(cfg.device));

    let base = format!("http://{}:{}", config.host, config.port);
    println!("devicestat server v{}", devicestat_core::VERSION);
    println!("   {base}");
    println!("   {} workers, {}s per connection", config.workers, cfg.timeout_secs);
    println!(
        "   reading {} and {}",
        cfg.device.proc_root.display(),
        cfg.device.sys_root.display()
    );
    println!();
    println!("   Endpoints:");
    for entry in ROUTES {
        println!("     GET {:<14} {}", entry.path, entry.description);
    }
    println!();
    println!("   Examples:");
    println!("     curl {base}/cpu");
    println!("     curl {base}/summary");
    println!();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };
    rt.block_on(async move {
        let handle = match HttpServer::new(config, monitor).start().await {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        };
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupt received, shutting down");
                handle.shutdown().await;
            }
            Err(e) => {
                log::warn!("cannot listen for ctrl-c ({e}); serving until the process is killed");
                handle.wait().await;
            }
        }
    });
}
