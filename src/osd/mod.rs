//! On-screen volume display over desktop notifications.
//!
//! The overlay is a freedesktop notification carrying the percent in the
//! standard `value` hint, so notification daemons render it as a level bar.
//! Every update replaces the previous bubble in place.

pub mod icons;

use std::collections::HashMap;

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};
use zbus::zvariant::Value;

use crate::volume::scale::IconTier;
use crate::APP_NAME;

/// Expiry handed to the notification server meaning "use your default".
pub const OSD_TIMEOUT_DEFAULT_MS: i32 = -1;

/// Coalescing tag so notification daemons reuse one slot for the bar.
const SYNCHRONOUS_TAG: &str = "volume";

/// Overlay display capability.
pub trait OsdDisplay {
    /// Requests the on-screen volume display. Best effort; never blocks.
    fn show(&mut self, timeout_ms: i32, tier: IconTier, percent: u8);
}

#[derive(Debug, Clone, Copy)]
struct OsdRequest {
    timeout_ms: i32,
    tier: IconTier,
    percent: u8,
}

/// OSD over the session notification service.
///
/// `show` posts the request to a worker task owning the D-Bus proxy, so the
/// caller never waits on the bus. The worker keeps the server-assigned
/// notification id and replaces the previous bubble on every update.
pub struct NotificationOsd {
    requests: UnboundedSender<OsdRequest>,
}

impl NotificationOsd {
    /// Connects to the session bus and spawns the delivery worker.
    pub async fn connect() -> zbus::Result<Self> {
        let connection = zbus::Connection::session().await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<OsdRequest>();

        tokio::spawn(async move {
            let proxy = match NotificationsProxy::new(&connection).await {
                Ok(proxy) => proxy,
                Err(err) => {
                    warn!("Notification service unavailable: {}", err);
                    return;
                }
            };
            let mut replaces_id = 0;
            while let Some(request) = rx.recv().await {
                match post(&proxy, replaces_id, request).await {
                    Ok(id) => replaces_id = id,
                    Err(err) => debug!("Notification delivery failed: {}", err),
                }
            }
        });

        Ok(Self { requests: tx })
    }
}

impl OsdDisplay for NotificationOsd {
    fn show(&mut self, timeout_ms: i32, tier: IconTier, percent: u8) {
        let request = OsdRequest {
            timeout_ms,
            tier,
            percent,
        };
        if self.requests.send(request).is_err() {
            debug!("OSD worker is gone, dropping display request");
        }
    }
}

async fn post(
    proxy: &NotificationsProxy<'_>,
    replaces_id: u32,
    request: OsdRequest,
) -> zbus::Result<u32> {
    let icon = icons::resolve(request.tier);
    let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
    hints.insert("value", Value::from(i32::from(request.percent)));
    hints.insert("x-canonical-private-synchronous", Value::from(SYNCHRONOUS_TAG));
    hints.insert("transient", Value::from(true));

    proxy
        .notify(
            APP_NAME,
            replaces_id,
            &icon,
            "Volume",
            &format!("{}%", request.percent),
            &[],
            hints,
            request.timeout_ms,
        )
        .await
}

#[zbus::proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications",
    gen_blocking = false
)]
trait Notifications {
    #[allow(clippy::too_many_arguments)]
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}
