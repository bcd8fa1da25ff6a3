use anyhow::{bail, Context, Result};
use bccmon_lib::EngineCommand;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::mpsc;
use std::time::Duration;

const DEFAULT_PORT: u16 = 1883;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    /// Broker address, e.g. "tcp://localhost:1883" or "broker.local"
    uri: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(default = "MqttConfig::default_keep_alive", with = "humantime_serde")]
    keep_alive: Duration,
    #[serde(
        default = "MqttConfig::default_reconnect_delay",
        with = "humantime_serde"
    )]
    reconnect_delay: Duration,
}

impl MqttConfig {
    fn default_topic() -> String {
        "bccmon".into()
    }

    fn default_qos() -> u8 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distr::Alphanumeric;
        use rand::Rng;

        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("bccmon-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive() -> Duration {
        Duration::from_secs(30)
    }

    fn default_reconnect_delay() -> Duration {
        Duration::from_secs(1)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// Splits `uri` into host and port. The scheme is optional, the port defaults to 1883.
    fn broker_address(&self) -> Result<(String, u16)> {
        let address = self
            .uri
            .split_once("://")
            .map_or(self.uri.as_str(), |(_, rest)| rest)
            .trim_end_matches('/');
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .with_context(|| format!("Invalid port in MQTT uri: {}", self.uri))?,
            ),
            None => (address, DEFAULT_PORT),
        };
        if host.is_empty() {
            bail!("Missing host in MQTT uri: {}", self.uri);
        }
        Ok((host.to_string(), port))
    }

    fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Topic operators publish `reset` or `clear` to.
    pub fn command_topic(&self) -> String {
        format!("{}/command", self.topic)
    }

    /// Connects in the background. When `commands` is set, the client subscribes to
    /// [`Self::command_topic`] after every (re)connect and forwards parsed commands.
    pub fn create_client(&self, commands: Option<mpsc::Sender<EngineCommand>>) -> Result<Client> {
        let (host, port) = self.broker_address()?;
        if self.keep_alive < MIN_KEEP_ALIVE {
            bail!(
                "MQTT keep_alive {:?} is below the minimum of {MIN_KEEP_ALIVE:?}",
                self.keep_alive
            );
        }
        let mut options = MqttOptions::new(&self.client_id, host.as_str(), port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                options.set_credentials(username, password);
            }
            (Some(username), None) => {
                options.set_credentials(username, "");
            }
            _ => {}
        }

        log::info!(
            "Attempting to connect to MQTT broker: {host}:{port} with client_id: {}",
            self.client_id
        );
        let (client, mut connection) = Client::new(options, 10);

        // The sync client only makes progress while its connection is iterated
        let reconnect_delay = self.reconnect_delay;
        let command_topic = self.command_topic();
        let mut subscriber = client.clone();
        std::thread::Builder::new()
            .name("mqtt-eventloop".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            log::info!("Connected to MQTT broker: {:?}", ack.code);
                            if commands.is_some() {
                                // Must not block, this thread drains the request queue
                                let topic = command_topic.as_str();
                                if let Err(e) = subscriber.try_subscribe(topic, QoS::AtLeastOnce) {
                                    log::error!("Cannot subscribe to {command_topic}: {e}");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish)))
                            if publish.topic == command_topic =>
                        {
                            let (Some(commands), Some(command)) =
                                (&commands, parse_command(&publish.payload))
                            else {
                                continue;
                            };
                            log::info!("Received {command:?} on {command_topic}");
                            if commands.send(command).is_err() {
                                log::debug!("Command receiver gone");
                            }
                        }
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(e) => {
                            log::warn!(
                                "MQTT connection error: {e}, retrying in {reconnect_delay:?}"
                            );
                            std::thread::sleep(reconnect_delay);
                        }
                    }
                }
                log::debug!("MQTT event loop stopped");
            })
            .with_context(|| "Cannot spawn MQTT event loop thread")?;
        Ok(client)
    }
}

/// Decodes a command payload, logging anything that is not a known command.
fn parse_command(payload: &[u8]) -> Option<EngineCommand> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Ignoring non UTF-8 command payload: {e}");
            return None;
        }
    };
    match text.parse() {
        Ok(command) => Some(command),
        Err(e) => {
            log::warn!("Ignoring MQTT command: {e}");
            None
        }
    }
}

pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig, commands: Option<mpsc::Sender<EngineCommand>>) -> Result<Self> {
        let client = config.create_client(commands)?;
        Ok(Self { client, config })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        log::debug!(
            "Publishing to MQTT: Topic='{}', Payload='{payload}', QoS={}",
            topic,
            self.config.qos
        );

        self.client
            .publish(topic, self.config.qos(), false, payload.as_bytes().to_vec())
            .with_context(|| format!("Failed to publish message to MQTT topic: {}", topic))?;

        Ok(())
    }
}
