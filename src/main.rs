// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tuberun::server::Server;

/// Self-hosted video download server. Paste a URL, pick a format, watch it land.
#[derive(Parser, Debug)]
#[command(name = "tuberun", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Address to bind to. Use 0.0.0.0 to allow network access.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Directory where completed downloads are stored (created if absent)
    #[arg(long, default_value = "downloads")]
    download_dir: PathBuf,

    /// External download tool binary name or path
    #[arg(long, default_value = "yt-dlp")]
    ytdlp_bin: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tuberun=debug"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    Server::new(cli.port)
        .with_bind_address(cli.bind)
        .with_download_dir(cli.download_dir)
        .with_ytdlp_bin(cli.ytdlp_bin)
        .start()
        .await
}
