//! Wires the poller, the push feed and the instance API to the terminal UI.
//!
//! Every background task here is owned by [`run`] and torn down before it
//! returns, so nothing outlives the view.

use std::sync::{mpsc, Arc};

use anyhow::{anyhow, Result};
use futures::StreamExt;
use lookout_client::{HttpBackend, InstanceApi};
use lookout_ops::NotificationCenter;
use lookout_push::{push_url, EventFeed, LocalFeed, StatsSubscription};
use lookout_types::config::LookoutConfig;
use lookout_viewer::{poll_interval, ImagePoller};
use tokio::{sync::mpsc as async_mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    actions,
    ui::{self, UiCommand, UiMessage},
};

const LOCAL_FEED_CAPACITY: usize = 64;

/// Open the push channel, or fall back to a silent local feed.
async fn open_feed(config: &LookoutConfig) -> Box<dyn EventFeed> {
    if !config.push.enabled {
        info!("Push channel disabled; live statistics unavailable");
        return Box::new(LocalFeed::new(LOCAL_FEED_CAPACITY));
    }
    let connected = match push_url(&config.backend.base_url, &config.push.path) {
        Ok(url) => StatsSubscription::connect(&url).await,
        Err(err) => Err(err),
    };
    match connected {
        Ok(subscription) => Box::new(subscription),
        Err(err) => {
            warn!("Push channel unavailable, continuing without it: {err}");
            Box::new(LocalFeed::new(LOCAL_FEED_CAPACITY))
        }
    }
}

async fn load_instances(backend: &HttpBackend, sender: &mpsc::Sender<UiMessage>) {
    let message = match backend.list_instances().await {
        Ok(instances) => UiMessage::Instances(instances),
        Err(err) => {
            warn!("Failed to load instances: {err}");
            UiMessage::InstancesFailed(err.user_message())
        }
    };
    let _ = sender.send(message);
}

pub async fn run(backend: HttpBackend, config: &LookoutConfig) -> Result<()> {
    let notifications = NotificationCenter::default();
    let (ui_tx, ui_rx) = mpsc::channel();
    let (command_tx, mut command_rx) = async_mpsc::unbounded_channel::<UiCommand>();

    let poller = Arc::new(ImagePoller::new(
        backend.clone(),
        config.viewer.detection_refresh,
    ));
    let handle = poller.spawn(poll_interval(&config.viewer));
    let feed = open_feed(config).await;

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let mut viewer_rx = handle.state();
    let viewer_tx = ui_tx.clone();
    tasks.push(tokio::spawn(async move {
        while viewer_rx.changed().await.is_ok() {
            let state = viewer_rx.borrow_and_update().clone();
            if viewer_tx.send(UiMessage::Viewer(state)).is_err() {
                break;
            }
        }
    }));

    let mut events = feed.subscribe();
    let event_tx = ui_tx.clone();
    let refresh_tx = command_tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event.invalidates_instances() {
                let _ = refresh_tx.send(UiCommand::Refresh);
            }
            if event_tx.send(UiMessage::Event(event)).is_err() {
                break;
            }
        }
    }));

    let command_backend = backend.clone();
    let command_ui = ui_tx.clone();
    let command_notifications = notifications.clone();
    tasks.push(tokio::spawn(async move {
        load_instances(&command_backend, &command_ui).await;
        while let Some(command) = command_rx.recv().await {
            let reload = match command {
                UiCommand::Refresh => true,
                UiCommand::Action { name, action } => {
                    actions::run_action(&command_backend, &command_notifications, &name, action)
                        .await
                }
                UiCommand::Delete { name } => {
                    actions::delete(&command_backend, &command_notifications, &name).await
                }
            };
            if reload {
                load_instances(&command_backend, &command_ui).await;
            }
        }
    }));

    let summary = format!("backend {}", backend.base_url());
    let ui_notifications = notifications.clone();
    let ui_result = tokio::task::spawn_blocking(move || {
        ui::run(ui_rx, command_tx, ui_notifications, summary)
    })
    .await;

    let _ = ui_tx.send(UiMessage::Shutdown);
    handle.shutdown();
    for task in &tasks {
        task.abort();
    }
    drop(feed);
    info!("Dashboard closed");

    ui_result.map_err(|err| anyhow!("ui task failed: {err}"))?
}
