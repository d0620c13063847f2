#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use iris_gateway::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iris-gateway", about = "Forward proxy gateway with a rotating upstream pool")]
struct Cli {
    /// Path to gateway config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Proxy listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Admin API listen address (overrides config)
    #[arg(long)]
    admin_listen: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::worker_thread_count();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
        admin_listen: cli.admin_listen,
    }))
}
