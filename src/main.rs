use clap::Parser;
use tracing::{debug, info, warn};

use tapedeck::app::App;
use tapedeck::config::Config;
use tapedeck::log;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = Config::parse(args.config);
    log::set(format!("tapedeck={}", cfg.log.level));
    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let app = App::new(cfg);

    let settings = app.settings().await;
    if !transcode::ffmpeg_available(&settings.ffmpeg_path).await {
        warn!(
            "transcoder binary {} not answering; captures will fail until it does",
            settings.ffmpeg_path.display()
        );
    } else if let Some(version) = transcode::ffmpeg_version(&settings.ffmpeg_path).await {
        info!("transcoder: {version}");
    }

    app.recover().await;
    info!("tapedeck up; waiting for scheduled recordings");

    shutdown_signal().await;
    app.shutdown().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
