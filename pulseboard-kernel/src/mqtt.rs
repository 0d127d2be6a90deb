use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MqttConf;
use crate::health::HealthTracker;

/// How long a power request waits for the broker before giving up.
const CONNECT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("mqtt broker unreachable")]
    Timeout,
    #[error("mqtt publish failed: {0}")]
    Publish(String),
}

/// Power actions the board can push to the fleet relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
}

impl PowerAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "on" => Some(PowerAction::On),
            "off" => Some(PowerAction::Off),
            _ => None,
        }
    }

    /// Payload published on the wire.
    pub fn command(self) -> &'static str {
        match self {
            PowerAction::On => "ON",
            PowerAction::Off => "OFF",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
        }
    }
}

#[derive(Debug)]
pub struct PowerReceipt {
    pub request_id: String,
    pub topic: String,
    pub command: &'static str,
}

/// MQTT-backed switch for the fleet power relay.
pub struct PowerSwitch {
    client: AsyncClient,
    topic: String,
    tracker: HealthTracker,
}

/// Builds the MQTT client and keeps its event loop alive in a background
/// task. Connection state lands in the health tracker, which is also what
/// power requests consult before publishing.
pub fn connect_power_switch(cfg: &MqttConf, tracker: HealthTracker) -> PowerSwitch {
    let client_id = cfg
        .client_id
        .clone()
        .unwrap_or_else(|| format!("pulseboard-kernel-{}", Uuid::new_v4().simple()));
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user.clone(), pass.clone());
    }

    tracker.mark_mqtt_connecting();
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    let loop_tracker = tracker.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    loop_tracker.mark_mqtt_connected();
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    loop_tracker.mark_mqtt_disconnected();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e:?}");
                    loop_tracker.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    PowerSwitch { client, topic: cfg.topic.clone(), tracker }
}

impl PowerSwitch {
    pub async fn switch(&self, action: PowerAction) -> Result<PowerReceipt, PowerError> {
        let request_id = Uuid::new_v4().to_string();
        self.wait_connected().await?;
        self.client
            .publish(self.topic.clone(), QoS::AtLeastOnce, false, action.command())
            .await
            .map_err(|e| PowerError::Publish(e.to_string()))?;
        info!(
            request_id = %request_id,
            topic = %self.topic,
            command = action.command(),
            "power command published"
        );
        Ok(PowerReceipt { request_id, topic: self.topic.clone(), command: action.command() })
    }

    async fn wait_connected(&self) -> Result<(), PowerError> {
        let tracker = self.tracker.clone();
        timeout(CONNECT_WAIT, async move {
            while !tracker.mqtt_connected() {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await
        .map_err(|_| PowerError::Timeout)
    }
}
