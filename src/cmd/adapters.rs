use anyhow::Result;
use serde_json::json;

use tvmux::Engine;

use super::output::print_json;

pub fn cmd_adapters(engine: &Engine) -> Result<()> {
    print_json(&engine.list_adapters())
}

pub async fn cmd_login(engine: &Engine, adapter: &str, username: &str, password: &str) -> Result<()> {
    let record = engine.login(adapter, username, password).await?;
    print_json(&json!({
        "adapter": adapter,
        "username": record.username,
        "lastUpdated": record.last_updated,
    }))
}

pub async fn cmd_channels(engine: &Engine, adapter: &str, refresh: bool) -> Result<()> {
    let channels = if refresh {
        engine.refresh_channels(adapter).await?
    } else {
        engine.channels(adapter).await?
    };
    print_json(&channels)
}
