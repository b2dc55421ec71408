use eyre::Context;
use std::io::IsTerminal;
use tokio_stream::StreamExt;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vidshare_client::{ClientConfig, Credentials, SessionStatus, VidshareClient, VideoQuery};

/// How many videos to list when `VIDSHARE_LIMIT` is unset.
const DEFAULT_LISTING: usize = 20;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let config = ClientConfig::from_env().context("load configuration")?;
    tracing::debug!(base_url = %config.base_url, "connecting");
    let client = VidshareClient::connect(config)
        .await
        .context("connect to video service")?;

    if let (Ok(login), Ok(password)) = (
        std::env::var("VIDSHARE_LOGIN"),
        std::env::var("VIDSHARE_PASSWORD"),
    ) {
        let credentials = if login.contains('@') {
            Credentials::email(login, password)
        } else {
            Credentials::username(login, password)
        };
        let user = client
            .store()
            .login(credentials)
            .await
            .context("log in")?;
        tracing::info!(username = %user.username, "logged in");
    } else if client.session().status() == SessionStatus::Anonymous {
        tracing::info!("browsing anonymously; set VIDSHARE_LOGIN and VIDSHARE_PASSWORD to log in");
    }

    let limit = match std::env::var("VIDSHARE_LIMIT") {
        Ok(limit) => limit
            .parse()
            .with_context(|| format!("parse VIDSHARE_LIMIT={limit:?}"))?,
        Err(_) => DEFAULT_LISTING,
    };
    let mut query = VideoQuery::default();
    if let Some(text) = std::env::args().nth(1) {
        query = query.matching(text);
    }

    let videos = client.store().stream_videos(query).take(limit);
    tokio::pin!(videos);
    while let Some(video) = videos.next().await {
        let video = video.context("list videos")?;
        let owner = video
            .owner
            .as_ref()
            .and_then(|owner| owner.username.as_deref())
            .unwrap_or("?");
        println!(
            "{}\t{}\t@{}\t{} views",
            video.id,
            video.title.as_deref().unwrap_or("untitled"),
            owner,
            video.views.unwrap_or_default(),
        );
    }

    Ok(())
}
