use anyhow::Result;
use serde_json::json;
use tvmux::{CacheEntry, Engine};

use super::output::print_json;

pub async fn cmd_cache_list(engine: &Engine, adapter: Option<&str>, content: Option<&str>) -> Result<()> {
    print_json(&engine.cache_query(adapter, content).await)
}

pub async fn cmd_cache_clear(engine: &Engine, adapter: Option<&str>, content: Option<&str>) -> Result<()> {
    let removed = engine.cache_clear(adapter, content).await?;
    print_json(&json!({ "removed": removed }))
}

/// Every invocation sweeps on startup; report what that removed.
pub fn cmd_cache_sweep(removed: &[CacheEntry]) -> Result<()> {
    print_json(&json!({ "removed": removed.len(), "entries": removed }))
}
