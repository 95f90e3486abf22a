//! Control Surface (§4.7): a D-Bus object at the well-known name
//! `org.fede.whisperaloud`, plus the in-process broadcast half
//! (`SessionController::subscribe`) that embedders (a tray icon, a hotkey
//! listener living in the same process) can use directly without a D-Bus
//! round-trip.
//!
//! Grounded on the teacher's `ipc` module for event *shape* — discrete
//! signal types carried over a broadcast channel — with the transport
//! swapped from Tauri's webview bridge to a bus-name-bound D-Bus object,
//! since there is no embedding GUI shell here (§9: "the daemon holds no
//! reference to any front-end").

use tracing::{error, info, warn};
use zbus::{fdo, interface, Connection, SignalContext};

use crate::controller::{Event as ControllerEvent, SessionController, ToggleOutcome};
use crate::error::{CoreError, Result};

pub const BUS_NAME: &str = "org.fede.whisperaloud";
pub const OBJECT_PATH: &str = "/org/fede/whisperaloud";
pub const INTERFACE_NAME: &str = "org.fede.whisperaloud.Control";

/// The D-Bus-exposed object. Methods delegate to the `SessionController`;
/// blocking controller calls run on a blocking-pool thread so they never
/// stall the connection's async executor.
pub struct ControlSurface {
    controller: SessionController,
}

impl ControlSurface {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }
}

#[interface(name = "org.fede.whisperaloud.Control")]
impl ControlSurface {
    #[zbus(name = "StartRecording")]
    async fn start_recording(&self) -> fdo::Result<()> {
        let controller = self.controller.clone();
        blocking(move || controller.start()).await
    }

    /// Blocks until transcription is ready, per §4.7's sync delivery
    /// pattern. `ToggleRecording` plus a `TranscriptionReady` subscription
    /// is the non-blocking counterpart clients can use instead.
    #[zbus(name = "StopRecording")]
    async fn stop_recording(&self) -> fdo::Result<String> {
        let controller = self.controller.clone();
        blocking(move || controller.stop()).await
    }

    #[zbus(name = "ToggleRecording")]
    async fn toggle_recording(&self) -> fdo::Result<String> {
        let controller = self.controller.clone();
        let outcome = blocking(move || controller.toggle()).await?;
        Ok(match outcome {
            ToggleOutcome::Started => "recording".to_string(),
            ToggleOutcome::Stopped(_) => "idle".to_string(),
        })
    }

    #[zbus(name = "CancelRecording")]
    async fn cancel_recording(&self) -> fdo::Result<()> {
        self.controller.cancel().map_err(to_fdo_error)
    }

    #[zbus(name = "GetStatus")]
    async fn get_status(&self) -> fdo::Result<String> {
        to_json(&self.controller.status())
    }

    #[zbus(name = "GetHistory")]
    async fn get_history(&self, limit: u32) -> fdo::Result<String> {
        let entries = self.controller.get_history(limit as usize).map_err(to_fdo_error)?;
        to_json(&entries)
    }

    #[zbus(name = "GetConfig")]
    async fn get_config(&self) -> fdo::Result<String> {
        to_json(&*self.controller.get_config())
    }

    #[zbus(name = "SetConfig")]
    async fn set_config(&self, changes_json: String) -> fdo::Result<()> {
        let changes: serde_json::Value = serde_json::from_str(&changes_json).map_err(to_serde_fdo_error)?;
        self.controller.set_config(&changes).map_err(to_fdo_error)?;
        Ok(())
    }

    #[zbus(name = "ReloadConfig")]
    async fn reload_config(&self, path: String) -> fdo::Result<()> {
        self.controller
            .reload_config(std::path::Path::new(&path))
            .map_err(to_fdo_error)
    }

    #[zbus(name = "Quit")]
    async fn quit(&self) -> fdo::Result<()> {
        self.controller.quit().map_err(to_fdo_error)
    }

    #[zbus(signal)]
    async fn recording_started(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn recording_stopped(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn transcription_ready(ctxt: &SignalContext<'_>, text: String, meta_json: String) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn level_update(ctxt: &SignalContext<'_>, level: f64) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn status_changed(ctxt: &SignalContext<'_>, state: String) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn config_changed(ctxt: &SignalContext<'_>, changed_keys: Vec<String>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn error(ctxt: &SignalContext<'_>, code: String, message: String) -> zbus::Result<()>;
}

async fn blocking<T, F>(f: F) -> fdo::Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| fdo::Error::Failed(format!("internal task failure: {e}")))?
        .map_err(to_fdo_error)
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(to_serde_fdo_error)
}

fn to_fdo_error(err: CoreError) -> fdo::Error {
    fdo::Error::Failed(err.to_string())
}

fn to_serde_fdo_error(err: serde_json::Error) -> fdo::Error {
    fdo::Error::Failed(format!("serialization error: {err}"))
}

/// Binds `org.fede.whisperaloud` and forwards controller events as D-Bus
/// signals for the lifetime of the returned connection. Per §4.7's
/// single-instance rule, a bind failure here means another instance already
/// owns the name — the caller (the CLI's daemon entry point) is responsible
/// for forwarding its arguments to the incumbent and exiting cleanly.
pub async fn serve(controller: SessionController) -> Result<Connection> {
    let surface = ControlSurface::new(controller.clone());
    let connection = Connection::session()
        .await
        .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
    connection
        .object_server()
        .at(OBJECT_PATH, surface)
        .await
        .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;

    connection.request_name(BUS_NAME).await.map_err(|e| {
        CoreError::Other(anyhow::anyhow!("another instance already owns {BUS_NAME}: {e}"))
    })?;
    info!(name = BUS_NAME, path = OBJECT_PATH, "control surface bound");

    spawn_event_forwarder(connection.clone(), controller);
    Ok(connection)
}

fn spawn_event_forwarder(connection: Connection, controller: SessionController) {
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        let iface_ref = match connection.object_server().interface::<_, ControlSurface>(OBJECT_PATH).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to acquire control surface interface reference");
                return;
            }
        };
        let ctxt = iface_ref.signal_context();

        loop {
            match events.recv().await {
                Ok(ControllerEvent::RecordingStarted) => {
                    let _ = ControlSurface::recording_started(ctxt).await;
                }
                Ok(ControllerEvent::RecordingStopped) => {
                    let _ = ControlSurface::recording_stopped(ctxt).await;
                }
                Ok(ControllerEvent::TranscriptionReady { text, meta }) => {
                    let meta_json = serde_json::to_string(&meta).unwrap_or_default();
                    let _ = ControlSurface::transcription_ready(ctxt, text, meta_json).await;
                }
                Ok(ControllerEvent::LevelUpdate { level }) => {
                    let _ = ControlSurface::level_update(ctxt, level as f64).await;
                }
                Ok(ControllerEvent::StatusChanged { state }) => {
                    let state_str = serde_json::to_value(state)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let _ = ControlSurface::status_changed(ctxt, state_str).await;
                }
                Ok(ControllerEvent::ConfigChanged { changed_keys }) => {
                    let _ = ControlSurface::config_changed(ctxt, changed_keys).await;
                }
                Ok(ControllerEvent::Error { code, message }) => {
                    let _ = ControlSurface::error(ctxt, code.as_str().to_string(), message).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "control surface event forwarder dropped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
