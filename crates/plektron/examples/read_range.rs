//! Example: read a resource through a `StreamingSource`.
//!
//! Initializes the source, reads the head sequentially, then seeks to the
//! middle so the loader restarts with a new range request.
//!
//! Run with:
//! ```
//! cargo run -p plektron --example read_range [URL]
//! ```

use std::{env::args, error::Error, sync::Arc, time::Duration};

use plektron::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

const READ_SIZE: usize = 32 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_line_number(false)
        .with_file(false)
        .init();

    let url = args()
        .nth(1)
        .unwrap_or_else(|| "https://download.samplelib.com/mp3/sample-15s.mp3".to_string());
    let url = Url::parse(&url)?;
    info!(%url, "opening");

    let net = HttpClient::new(NetOptions::default())?.with_timeout(Duration::from_secs(15));
    let source = StreamingSource::new(SourceConfig::new(url), Arc::new(net), LiveRegistry::shared());

    let mut events = source.events();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            info!(?ev);
        }
    });

    source.initialize().await?;
    info!(
        total_bytes = ?source.total_bytes(),
        streaming = source.is_streaming(),
        "initialized"
    );

    source.media_is_playing();
    let mut position = 0u64;
    for _ in 0..4 {
        let chunk = source.read(position, READ_SIZE).await?;
        if chunk.is_empty() {
            break;
        }
        info!(position, len = chunk.len(), "read");
        position += chunk.len() as u64;
    }

    if let Some(total) = source.total_bytes()
        && !source.is_streaming()
    {
        let middle = total / 2;
        let chunk = source.read(middle, READ_SIZE).await?;
        info!(position = middle, len = chunk.len(), "seek read");
    }

    info!(buffered = ?source.buffered_ranges(), "done");
    source.stop();
    Ok(())
}
