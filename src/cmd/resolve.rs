use anyhow::Result;

use tvmux::{Engine, Playback};

use super::output::print_json;

pub async fn cmd_resolve(engine: &Engine, content_id: &str, adapter: Option<&str>) -> Result<()> {
    let resolution = engine.resolve(content_id, adapter).await?;
    print_json(&resolution)
}

pub async fn cmd_playlist(
    engine: &Engine,
    content_id: &str,
    adapter: Option<&str>,
    raw: bool,
) -> Result<()> {
    let playback = engine.playback(content_id, adapter).await?;

    match (&playback, raw) {
        (Playback::Playlist { body, .. }, true) => {
            print!("{body}");
            Ok(())
        }
        (Playback::Direct(descriptor), true) => {
            println!("{}", descriptor.stream_url);
            Ok(())
        }
        (_, false) => print_json(&playback),
    }
}
