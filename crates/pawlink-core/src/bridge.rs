//! The front-end facing bridge.
//!
//! A [`Bridge`] wires a [`ConnectionManager`], a [`Dispatcher`] and a
//! [`FanOut`] together and exposes the three things a front-end needs:
//! issue a command, follow the status stream, and ask whether the
//! controller is reachable.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pawlink_config::AppConfig;

use crate::codec::{Command, Params, StatusEvent};
use crate::dispatch::{Accepted, Dispatcher};
use crate::error::BridgeError;
use crate::fanout::{FanOut, RegistrationHandle, Subscription};
use crate::link::{ConnectionManager, LinkHandle, LinkInfo, LinkSettings};

/// Connection, dispatch, and fan-out for one controller.
#[derive(Debug)]
pub struct Bridge {
    fanout: FanOut,
    link: LinkHandle,
    dispatcher: Dispatcher,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Start connecting to the configured controller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &AppConfig) -> Self {
        let fanout = FanOut::new(config.fanout.buffer);
        let settings = LinkSettings::from_config(&config.controller);
        let (link, manager) = ConnectionManager::spawn(settings, fanout.clone());
        let dispatcher = Dispatcher::new(link.clone(), &config.dispatch);
        info!(endpoint = %config.controller.endpoint, "Bridge started");

        Self {
            fanout,
            link,
            dispatcher,
            manager: Mutex::new(Some(manager)),
        }
    }

    /// Build a command from front-end input and dispatch it.
    pub async fn request_command(
        &self,
        name: &str,
        params: Params,
    ) -> Result<Accepted, BridgeError> {
        self.dispatch(&Command::from_parts(name, params)).await
    }

    pub async fn dispatch(&self, command: &Command) -> Result<Accepted, BridgeError> {
        self.dispatcher.dispatch(command).await
    }

    /// A dispatcher sharing this bridge's link, for components that issue
    /// commands on their own schedule.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Attach a new front-end with a bridge-managed buffer.
    pub fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }

    /// Attach a front-end that supplies its own delivery channel.
    pub fn attach(&self, tx: mpsc::Sender<StatusEvent>) -> RegistrationHandle {
        self.fanout.attach(tx)
    }

    pub fn detach(&self, handle: RegistrationHandle) -> Result<(), BridgeError> {
        if self.fanout.detach(handle) {
            Ok(())
        } else {
            Err(BridgeError::AppTargetMissing(handle.to_string()))
        }
    }

    pub fn attached_front_ends(&self) -> usize {
        self.fanout.attached()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn link_info(&self) -> LinkInfo {
        self.link.info()
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    /// Close the link, cancel any pending reconnect, and wait for the
    /// connection manager to stop. No status events follow.
    pub async fn shutdown(&self) {
        self.link.shutdown();
        let manager = self
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(manager) = manager {
            if let Err(e) = manager.await {
                debug!(error = %e, "Connection manager task ended abnormally");
            }
            info!("Bridge stopped");
        }
    }
}
