use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use refmatch::config::AppConfig;
use refmatch::http::serve;
use refmatch::service::MatchService;
use refmatch::sift::SiftExtractor;

#[derive(Parser)]
#[command(version, about, author)]
struct RefMatchServerCli {
    /// optional json config, missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = RefMatchServerCli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            log::info!("Using config: {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    log::debug!("{:?}", config);

    let extractor = SiftExtractor::new(config.sift);
    let service = Arc::new(MatchService::new(Box::new(extractor), config.matcher));
    let listener = TcpListener::bind(config.server.bind_address())?;
    serve(listener, service, config.server.max_body_bytes)?;
    Ok(())
}
