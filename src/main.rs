#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use apns_courier::adapters::metrics::OtelMetricsListener;
use apns_courier::config::ClientConfig;
use apns_courier::domain::payload::ApnsPayloadBuilder;
use apns_courier::error::SendError;
use apns_courier::{ApnsClient, ConnectionState, DeliveryPriority, PushNotification, telemetry};
use clap::{Args, Parser};
use std::sync::Arc;
use tracing::Instrument;

/// Sends a single alert notification through the gateway.
///
/// The connection is HTTP/2 without TLS. Reaching the public push gateway
/// needs a TLS-terminating relay in front of it.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    client: ClientConfig,

    #[command(flatten)]
    notification: NotificationArgs,
}

#[derive(Clone, Debug, Args)]
struct NotificationArgs {
    /// Device token as hex; angle brackets and spaces are ignored
    #[arg(long)]
    token: String,

    /// Topic, usually the app's bundle id
    #[arg(long, env = "APNS_TOPIC")]
    topic: String,

    /// Alert title
    #[arg(long)]
    title: Option<String>,

    /// Alert body
    #[arg(long, default_value = "Hello from apns-courier")]
    body: String,

    /// Badge number to set on the app icon
    #[arg(long)]
    badge: Option<u32>,

    /// Sound file name, or "default"
    #[arg(long)]
    sound: Option<String>,

    /// Notifications sharing a collapse id replace each other on the device
    #[arg(long)]
    collapse_id: Option<String>,

    /// Deliver when it is convenient for the device's battery
    #[arg(long, default_value_t = false)]
    conserve_power: bool,
}

impl NotificationArgs {
    fn build(&self, max_payload_size: usize) -> anyhow::Result<PushNotification> {
        let mut payload = ApnsPayloadBuilder::new();
        payload.set_alert_body(self.body.clone());
        if let Some(title) = &self.title {
            payload.set_alert_title(title.clone());
        }
        if let Some(badge) = self.badge {
            payload.set_badge(badge);
        }
        if let Some(sound) = &self.sound {
            payload.set_sound(sound.clone());
        }

        let mut notification =
            PushNotification::new(&self.token, self.topic.clone(), payload.build_with_max_length(max_payload_size))?;
        if let Some(collapse_id) = &self.collapse_id {
            notification = notification.with_collapse_id(collapse_id.clone());
        }
        if self.conserve_power {
            notification = notification.with_priority(DeliveryPriority::Conserve);
        }
        Ok(notification)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry_guard = telemetry::init_telemetry(&cli.client.telemetry)?;

    let result = run(&cli).instrument(tracing::info_span!("send_notification")).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Failed to send notification");
    }

    telemetry_guard.shutdown();
    result
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut builder = cli.client.builder()?;
    if cli.client.telemetry.otlp_endpoint.is_some() {
        builder = builder.with_metrics_listener(Arc::new(OtelMetricsListener::new()));
    }
    let client = builder.build()?;
    let notification = cli.notification.build(cli.client.gateway.max_payload_size)?;

    let endpoint = cli.client.gateway.endpoint();
    tracing::info!(%endpoint, "Connecting to gateway");
    client.connect(endpoint).await?;

    let result = deliver(&client, notification).await;
    client.shutdown().await;
    result
}

async fn deliver(client: &ApnsClient, notification: PushNotification) -> anyhow::Result<()> {
    let mut outcome = client.send_notification(notification.clone()).await;

    if matches!(outcome, Err(SendError::ClientNotConnected | SendError::ConnectionLost(_))) {
        tracing::warn!("Gateway connection dropped; resending once reconnected");
        let reconnected = client.reconnection_future();
        if client.state() != ConnectionState::Connected {
            reconnected.await?;
        }
        outcome = client.send_notification(notification).await;
    }

    let response = outcome?;
    if response.is_accepted() {
        tracing::info!(apns_id = %response.apns_id(), "Notification accepted");
    } else {
        tracing::warn!(
            apns_id = %response.apns_id(),
            reason = ?response.rejection_reason(),
            token_invalidated_at = ?response.token_invalidation_timestamp(),
            "Notification rejected"
        );
    }
    Ok(())
}
