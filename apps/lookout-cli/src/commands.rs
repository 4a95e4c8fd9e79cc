//! One-shot subcommands that print to stdout and exit.

use std::{io::Write, path::Path, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use lookout_client::{HttpBackend, InstanceApi};
use lookout_ops::{Notification, NotificationCenter, NotificationKind};
use lookout_push::{push_url, EventFeed, StatsSubscription};
use lookout_types::{
    config::LookoutConfig,
    instance::{
        Instance, InstanceAction, InstanceSource, InstanceStatus, DEFAULT_FOLDER_PATH,
        DEFAULT_FREQUENCY_SECS,
    },
};
use lookout_viewer::{ImagePoller, PollOutcome, ViewerState};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{actions, snapshot};

const STATS_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Youtube,
    Camera,
}

/// Instance fields accepted by `add` and `edit`. Unset fields keep their
/// current value on edit and their default on add.
#[derive(Debug, Clone, Default, Args)]
pub struct InstanceArgs {
    #[arg(long = "type", value_enum)]
    pub kind: Option<SourceKind>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub folder: Option<String>,
    /// Capture interval in seconds.
    #[arg(long)]
    pub frequency: Option<u64>,
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,
}

impl InstanceArgs {
    /// Merge the flags over `base` (edit) or over the form defaults (add).
    pub fn apply(&self, base: Option<Instance>, name: &str) -> Result<Instance> {
        let mut instance = base.unwrap_or_else(|| Instance {
            name: name.to_string(),
            source: InstanceSource::Youtube { url: String::new() },
            frequency: DEFAULT_FREQUENCY_SECS,
            lookout_endpoint: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            status: InstanceStatus::Stopped,
        });
        instance.name = name.to_string();

        let kind = self.kind.unwrap_or(match instance.source {
            InstanceSource::Youtube { .. } => SourceKind::Youtube,
            InstanceSource::Camera { .. } => SourceKind::Camera,
        });
        let url = self
            .url
            .clone()
            .unwrap_or_else(|| instance.source.url().to_string());
        instance.source = match (kind, &instance.source) {
            (SourceKind::Youtube, _) => InstanceSource::Youtube { url },
            (
                SourceKind::Camera,
                InstanceSource::Camera {
                    username,
                    password,
                    folder_path,
                    ..
                },
            ) => InstanceSource::Camera {
                url,
                username: self.username.clone().unwrap_or_else(|| username.clone()),
                password: self.password.clone().unwrap_or_else(|| password.clone()),
                folder_path: self.folder.clone().unwrap_or_else(|| folder_path.clone()),
            },
            (SourceKind::Camera, InstanceSource::Youtube { .. }) => InstanceSource::Camera {
                url,
                username: self.username.clone().unwrap_or_default(),
                password: self.password.clone().unwrap_or_default(),
                folder_path: self
                    .folder
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FOLDER_PATH.to_string()),
            },
        };

        if let Some(frequency) = self.frequency {
            instance.frequency = frequency;
        }
        if let Some(endpoint) = &self.endpoint {
            instance.lookout_endpoint = endpoint.clone();
        }
        if let Some(lat) = self.lat {
            instance.latitude = lat;
        }
        if let Some(lon) = self.lon {
            instance.longitude = lon;
        }
        instance.validate()?;
        Ok(instance)
    }
}

pub async fn list(backend: &HttpBackend) -> Result<()> {
    let instances = backend.list_instances().await?;
    if instances.is_empty() {
        println!("No instances configured.");
        return Ok(());
    }
    println!(
        "{:<9} {:<24} {:>9} {:<8} {:<28} {}",
        "STATUS", "NAME", "FREQ (s)", "TYPE", "LINK", "LOCATION"
    );
    for instance in &instances {
        let location = if instance.has_location() {
            format!("{:.4}, {:.4}", instance.latitude, instance.longitude)
        } else {
            "-".to_string()
        };
        println!(
            "{:<9} {:<24} {:>9} {:<8} {:<28} {}",
            instance.status.label(),
            instance.name,
            instance.frequency,
            instance.source.label(),
            instance.link_text(),
            location
        );
    }
    Ok(())
}

pub async fn action(backend: &HttpBackend, name: &str, action: InstanceAction) -> Result<()> {
    let center = NotificationCenter::default();
    let ok = actions::run_action(backend, &center, name, action).await;
    report(&center, ok)
}

pub async fn delete(backend: &HttpBackend, name: &str, confirmed: bool) -> Result<()> {
    if !confirmed && !confirm(&format!("Delete instance '{name}'? [y/N] "))? {
        println!("Aborted.");
        return Ok(());
    }
    let center = NotificationCenter::default();
    let ok = actions::delete(backend, &center, name).await;
    report(&center, ok)
}

pub async fn add(backend: &HttpBackend, name: &str, args: &InstanceArgs) -> Result<()> {
    let instance = args.apply(None, name)?;
    let center = NotificationCenter::default();
    let ok = actions::save(backend, &center, None, &instance).await;
    report(&center, ok)
}

pub async fn edit(backend: &HttpBackend, name: &str, args: &InstanceArgs) -> Result<()> {
    let existing = backend
        .list_instances()
        .await?
        .into_iter()
        .find(|instance| instance.name == name)
        .ok_or_else(|| anyhow!("no instance named '{name}'"))?;
    let instance = args.apply(Some(existing), name)?;
    let center = NotificationCenter::default();
    let ok = actions::save(backend, &center, Some(name), &instance).await;
    report(&center, ok)
}

/// Poll once and print the joined image list as JSON.
pub async fn images(backend: HttpBackend, config: &LookoutConfig) -> Result<()> {
    let state = poll_once(backend, config).await?;
    println!("{}", serde_json::to_string_pretty(&state.images)?);
    Ok(())
}

async fn poll_once(backend: HttpBackend, config: &LookoutConfig) -> Result<ViewerState> {
    let poller = ImagePoller::new(backend, config.viewer.detection_refresh);
    match poller.poll().await {
        PollOutcome::Updated { .. } => Ok(poller.snapshot()),
        outcome => bail!("image poll did not complete: {outcome:?}"),
    }
}

/// Wait for the first statistics broadcast and print it.
pub async fn stats(config: &LookoutConfig) -> Result<()> {
    let url = push_url(&config.backend.base_url, &config.push.path)?;
    let subscription = StatsSubscription::connect(&url).await?;
    let mut updates = subscription.stats();
    let waited = timeout(STATS_WAIT, updates.changed()).await;
    let result = match waited {
        Ok(Ok(())) => {
            let stats = subscription.latest_stats();
            println!("CPU usage:        {:.1}%", stats.cpu);
            println!("Network sent:     {:.2} MB", stats.network_sent);
            println!("Network received: {:.2} MB", stats.network_recv);
            Ok(())
        }
        Ok(Err(_)) => Err(anyhow!("push channel closed before any statistics arrived")),
        Err(_) => Err(anyhow!(
            "no statistics received within {}s",
            STATS_WAIT.as_secs()
        )),
    };
    subscription.shutdown().await;
    result
}

/// Download the latest frame for `key` and write it with detection boxes drawn.
pub async fn snapshot(
    backend: HttpBackend,
    config: &LookoutConfig,
    key: &str,
    output: &Path,
) -> Result<()> {
    let state = poll_once(backend.clone(), config).await?;
    let joined = snapshot::find_image(&state.images, key)
        .ok_or_else(|| anyhow!("no image for '{key}'"))?;
    let bytes = backend
        .fetch_frame(&joined.image.url)
        .await
        .with_context(|| format!("failed to download {}", joined.image.url))?;
    snapshot::write_annotated(&bytes, joined.detections.as_ref(), output)?;
    let boxes = joined
        .detections
        .as_ref()
        .map(|d| d.results.len())
        .unwrap_or(0);
    info!("Wrote snapshot of '{}' to {}", key, output.display());
    println!("Wrote {} ({} detections)", output.display(), boxes);
    Ok(())
}

/// End the session. The local session is dropped whatever the backend says.
pub async fn logout(backend: &HttpBackend) -> Result<()> {
    if let Err(err) = backend.logout().await {
        warn!("Logout request failed: {err}");
    }
    println!("Logged out.");
    Ok(())
}

fn report(center: &NotificationCenter, ok: bool) -> Result<()> {
    for Notification { message, kind, .. } in center.active() {
        match kind {
            NotificationKind::Error => eprintln!("{message}"),
            _ => println!("{message}"),
        }
    }
    if ok {
        Ok(())
    } else {
        bail!("request failed")
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
