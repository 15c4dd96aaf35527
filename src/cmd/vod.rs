use anyhow::Result;

use tvmux::{Engine, VodOptions};

use super::output::print_json;

pub async fn cmd_vod_list(
    engine: &Engine,
    adapter: &str,
    page: Option<u32>,
    filter: Option<String>,
    query: Option<String>,
) -> Result<()> {
    let options = VodOptions {
        page,
        filter,
        query,
    };
    print_json(&engine.vod_list(adapter, &options).await?)
}

pub async fn cmd_vod_show(
    engine: &Engine,
    adapter: &str,
    show_id: &str,
    filter: Option<String>,
) -> Result<()> {
    let options = VodOptions {
        filter,
        ..VodOptions::default()
    };
    print_json(&engine.vod(adapter, show_id, &options).await?)
}

pub async fn cmd_vod_episode(
    engine: &Engine,
    adapter: &str,
    show_id: &str,
    episode_id: &str,
) -> Result<()> {
    print_json(&engine.vod_episode(adapter, show_id, episode_id).await?)
}
