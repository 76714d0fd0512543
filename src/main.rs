use std::process::ExitCode;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mytorrent::config::{RunPaths, Settings};
use mytorrent::engine::Download;
use mytorrent::metainfo::Metainfo;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "myTorrent".into());
    let (Some(torrent_path), None) = (args.next(), args.next()) else {
        eprintln!("Usage: {program} <path_to_torrent>");
        return ExitCode::FAILURE;
    };

    match run(&torrent_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(torrent_path: &str) -> anyhow::Result<()> {
    let paths = RunPaths::from_exe().context("resolving run paths")?;
    paths.prepare().context("creating run directories")?;
    let settings = Settings::load(&paths.config_file);

    let data = std::fs::read(torrent_path)
        .with_context(|| format!("reading {torrent_path}"))?;
    let metainfo = Metainfo::from_bytes(&data).context("parsing metainfo")?;
    info!(
        name = %metainfo.info.name,
        size = metainfo.info.total_length,
        info_hash = %metainfo.info_hash,
        "loaded torrent"
    );

    paths
        .cache_metainfo(torrent_path.as_ref())
        .context("caching metainfo file")?;

    let mut download = Download::new(metainfo, settings, &paths.downloads_dir)
        .context("preparing download")?;
    download.run().context("download failed")?;
    Ok(())
}
