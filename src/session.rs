//! Async runtime around a [`SessionManager`].
//!
//! The session is owned by a single tokio task that serializes user commands
//! and platform completions, so every handler runs to completion before the
//! next one starts.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::btleplug_backend::BtleplugPlatform;
use crate::ble::platform::{BlePlatform, PlatformEvent};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{Notifier, SessionEvent};
use crate::session_manager::SessionManager;

/// A user action delivered to the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start (or restart) device discovery.
    StartDiscovery,
    /// Select a device by name and connect to it.
    SelectDevice(String),
    /// Connect to the selected device.
    Connect,
    /// Select a service by UUID text.
    SelectService(String),
    /// Bind RX to a characteristic by UUID text.
    SelectNotifyCharacteristic(String),
    /// Bind TX to a characteristic by UUID text.
    SelectWriteCharacteristic(String),
    /// Disconnect from the device.
    Disconnect,
    /// Frame and write a message to TX.
    Send(String),
    /// Tear down the session and stop the task.
    Shutdown,
}

/// Runs a session on a background task.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Spawn the session task.
    ///
    /// `platform_events` must carry the completions of the session's platform.
    /// Must be called from within a tokio runtime.
    pub fn spawn<P>(
        session: SessionManager<P>,
        platform_events: mpsc::UnboundedReceiver<PlatformEvent>,
    ) -> SessionHandle
    where
        P: BlePlatform + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel(session.config().command_capacity);
        let notifier = session.notifier().clone();

        let task = tokio::spawn(Self::run(session, commands_rx, platform_events));

        SessionHandle {
            commands: commands_tx,
            notifier,
            task,
        }
    }

    async fn run<P: BlePlatform>(
        mut session: SessionManager<P>,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut platform_events: mpsc::UnboundedReceiver<PlatformEvent>,
    ) {
        debug!("Session task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => Self::apply(&mut session, command),
                },
                Some(event) = platform_events.recv() => {
                    session.handle_event(event);
                }
            }

            session.run_deferred();
        }

        session.shutdown();
        info!("Session task stopped");
    }

    fn apply<P: BlePlatform>(session: &mut SessionManager<P>, command: SessionCommand) {
        debug!("Command: {:?}", command);

        let result = match command {
            SessionCommand::StartDiscovery => {
                session.start_discovery();
                Ok(())
            }
            SessionCommand::SelectDevice(name) => session.select_device(&name),
            SessionCommand::Connect => session.connect(),
            SessionCommand::SelectService(uuid) => session.select_service(&uuid),
            SessionCommand::SelectNotifyCharacteristic(uuid) => {
                session.select_notify_characteristic(&uuid)
            }
            SessionCommand::SelectWriteCharacteristic(uuid) => {
                session.select_write_characteristic(&uuid)
            }
            SessionCommand::Disconnect => {
                session.disconnect();
                Ok(())
            }
            SessionCommand::Send(message) => session.write(&message),
            SessionCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!("Command failed: {}", e);
        }
    }
}

/// Handle to a running session task.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    notifier: Notifier,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    /// Queue a command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the task has stopped.
    pub async fn send_command(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Start device discovery.
    pub async fn start_discovery(&self) -> Result<()> {
        self.send_command(SessionCommand::StartDiscovery).await
    }

    /// Select a device by name and connect.
    pub async fn select_device(&self, name: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::SelectDevice(name.into()))
            .await
    }

    /// Reconnect to the selected device.
    pub async fn connect(&self) -> Result<()> {
        self.send_command(SessionCommand::Connect).await
    }

    /// Select a service.
    pub async fn select_service(&self, uuid: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::SelectService(uuid.into()))
            .await
    }

    /// Bind RX.
    pub async fn select_notify_characteristic(&self, uuid: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::SelectNotifyCharacteristic(uuid.into()))
            .await
    }

    /// Bind TX.
    pub async fn select_write_characteristic(&self, uuid: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::SelectWriteCharacteristic(uuid.into()))
            .await
    }

    /// Disconnect from the device.
    pub async fn disconnect(&self) -> Result<()> {
        self.send_command(SessionCommand::Disconnect).await
    }

    /// Frame and write a message to TX.
    pub async fn send(&self, message: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::Send(message.into()))
            .await
    }

    /// Check if the session task has stopped.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session, disconnecting and releasing the device, and wait
    /// for the task to finish.
    pub async fn shutdown(self) -> Result<()> {
        // A closed inbox means the task is already exiting.
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Session task failed: {}", e)))
    }
}

/// Entry point for a session on the host Bluetooth adapter.
pub struct BleSession;

impl BleSession {
    /// Open the first adapter and start a session on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if no adapter is present.
    pub async fn connect_default(config: SessionConfig) -> Result<SessionHandle> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let platform = BtleplugPlatform::new(events_tx).await?;
        let session = SessionManager::new(platform, config);
        Ok(SessionRuntime::spawn(session, events_rx))
    }
}
