//! D-Bus client half of the CLI: sends a single control command to a running
//! daemon and prints its reply. Grounded on `whisper-aloud-core::control`'s
//! bus name/object path/interface constants — this is the only place outside
//! the core that needs to know them.

use anyhow::{anyhow, Context, Result};
use whisper_aloud_core::control::{BUS_NAME, INTERFACE_NAME, OBJECT_PATH};
use zbus::{Connection, Proxy};

async fn connect() -> Result<Proxy<'static>> {
    let connection = Connection::session()
        .await
        .context("connecting to the D-Bus session bus")?;
    Proxy::new(&connection, BUS_NAME, OBJECT_PATH, INTERFACE_NAME)
        .await
        .context("no whisper_aloud daemon is running (reaching the control surface failed)")
}

pub async fn start() -> Result<()> {
    let proxy = connect().await?;
    proxy.call::<_, _, ()>("StartRecording", &()).await?;
    println!("recording started");
    Ok(())
}

pub async fn stop() -> Result<()> {
    let proxy = connect().await?;
    let text: String = proxy.call("StopRecording", &()).await?;
    println!("{text}");
    Ok(())
}

pub async fn toggle() -> Result<()> {
    let proxy = connect().await?;
    let state: String = proxy.call("ToggleRecording", &()).await?;
    println!("{state}");
    Ok(())
}

pub async fn cancel() -> Result<()> {
    let proxy = connect().await?;
    proxy.call::<_, _, ()>("CancelRecording", &()).await?;
    println!("cancelled");
    Ok(())
}

pub async fn status() -> Result<()> {
    let proxy = connect().await?;
    let json: String = proxy.call("GetStatus", &()).await?;
    println!("{json}");
    Ok(())
}

pub async fn history(limit: u32) -> Result<()> {
    let proxy = connect().await?;
    let json: String = proxy.call("GetHistory", &(limit,)).await?;
    println!("{json}");
    Ok(())
}

pub async fn get_config() -> Result<()> {
    let proxy = connect().await?;
    let json: String = proxy.call("GetConfig", &()).await?;
    println!("{json}");
    Ok(())
}

pub async fn set_config(changes_json: &str) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(changes_json)
        .map_err(|e| anyhow!("--set payload is not valid JSON: {e}"))?;
    let proxy = connect().await?;
    proxy
        .call::<_, _, ()>("SetConfig", &(changes_json,))
        .await?;
    println!("config updated");
    Ok(())
}

pub async fn reload(path: &str) -> Result<()> {
    let proxy = connect().await?;
    proxy.call::<_, _, ()>("ReloadConfig", &(path,)).await?;
    println!("config reloaded");
    Ok(())
}

pub async fn quit() -> Result<()> {
    let proxy = connect().await?;
    proxy.call::<_, _, ()>("Quit", &()).await?;
    println!("quitting");
    Ok(())
}
