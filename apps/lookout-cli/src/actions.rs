//! Instance actions and the notifications they produce.

use lookout_client::InstanceApi;
use lookout_ops::{NotificationCenter, NotificationKind};
use lookout_types::{
    instance::{Instance, InstanceAction},
    LookoutError,
};
use tracing::warn;

/// Start or stop an instance. Returns whether the instance list should be
/// reloaded.
pub async fn run_action<A>(
    api: &A,
    notifications: &NotificationCenter,
    name: &str,
    action: InstanceAction,
) -> bool
where
    A: InstanceApi + ?Sized,
{
    match api.perform_action(name, action).await {
        Ok(()) => {
            notifications.push(
                format!("Instance {} successfully", action.past_tense()),
                NotificationKind::Success,
            );
            true
        }
        Err(LookoutError::Http { message, .. }) => {
            notifications.push(message, NotificationKind::Error);
            false
        }
        Err(err) => {
            warn!("Error {} instance '{}': {err}", action.gerund(), name);
            notifications.push(
                format!("Error {} instance", action.gerund()),
                NotificationKind::Error,
            );
            false
        }
    }
}

pub async fn delete<A>(api: &A, notifications: &NotificationCenter, name: &str) -> bool
where
    A: InstanceApi + ?Sized,
{
    match api.delete_instance(name).await {
        Ok(()) => {
            notifications.push("Instance deleted successfully", NotificationKind::Success);
            true
        }
        Err(err) => {
            warn!("Error deleting instance '{}': {err}", name);
            notifications.push("Error deleting instance", NotificationKind::Error);
            false
        }
    }
}

/// Create (`existing == None`) or update an instance.
pub async fn save<A>(
    api: &A,
    notifications: &NotificationCenter,
    existing: Option<&str>,
    instance: &Instance,
) -> bool
where
    A: InstanceApi + ?Sized,
{
    let result = match existing {
        Some(name) => api.update_instance(name, instance).await,
        None => api.create_instance(instance).await.map(|_| ()),
    };
    match result {
        Ok(()) => {
            notifications.push("Instance saved successfully", NotificationKind::Success);
            true
        }
        Err(err) => {
            warn!("Error saving instance '{}': {err}", instance.name);
            notifications.push(
                format!("Error saving instance: {}", err.user_message()),
                NotificationKind::Error,
            );
            false
        }
    }
}
