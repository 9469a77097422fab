use std::sync::Arc;

/// Open a Zenoh session in client mode connected to `endpoint`.
pub async fn open_zenoh_session(endpoint: &str) -> anyhow::Result<Arc<zenoh::Session>> {
    log::info!("Connecting to Zenoh at: {}", endpoint);

    let mut config = zenoh::Config::default();
    // Client mode routes through the zenohd router
    config
        .insert_json5("mode", r#""client""#)
        .map_err(|e| anyhow::anyhow!("Failed to set Zenoh mode: {}", e))?;
    config
        .insert_json5("connect/endpoints", &serde_json::json!([endpoint]).to_string())
        .map_err(|e| anyhow::anyhow!("Failed to set Zenoh endpoint: {}", e))?;
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .map_err(|e| anyhow::anyhow!("Failed to disable multicast: {}", e))?;
    config
        .insert_json5("scouting/gossip/enabled", "false")
        .map_err(|e| anyhow::anyhow!("Failed to disable gossip: {}", e))?;

    let session = zenoh::open(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session at '{}': {}", endpoint, e))?;

    log::info!("Connected to Zenoh");
    Ok(Arc::new(session))
}
