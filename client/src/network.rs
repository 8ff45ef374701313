use log::{debug, error, info, warn};
use rand::Rng;
use shared::{encode, event_tag, Codec, Packet, PlayerRef, Snapshot, MAX_DATAGRAM_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub address
    pub server: String,
    pub token: String,
    /// State records sent per second
    pub send_rate: u32,
    /// Size of each random state record
    pub record_len: usize,
    /// Chat line sent every `chat_interval`, if set
    pub chat: Option<String>,
    pub chat_interval: Duration,
    /// Stop after this long; runs until disconnected when unset
    pub duration: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:7777".to_string(),
            token: "guest".to_string(),
            send_rate: 20,
            record_len: 16,
            chat: None,
            chat_interval: Duration::from_secs(2),
            duration: None,
        }
    }
}

/// Counters kept by the client, reported when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub states_sent: u64,
    pub snapshots: u64,
    pub stale_snapshots: u64,
    pub messages: u64,
    pub events: u64,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    codec: Codec,
    config: ClientConfig,

    player: Option<PlayerRef>,
    connected: bool,
    last_sequence: Option<u64>,
    last_snapshot: Option<Snapshot>,
    stats: ClientStats,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server.parse()?;

        Ok(Client {
            socket,
            server_addr,
            codec: Codec::default(),
            config,
            player: None,
            connected: false,
            last_sequence: None,
            last_snapshot: None,
            stats: ClientStats::default(),
        })
    }

    pub fn player(&self) -> Option<PlayerRef> {
        self.player
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_addr);

        let packet = Packet::Auth {
            token: self.config.token.clone(),
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let frame = encode(packet)?;
        self.socket.send_to(&frame, self.server_addr).await?;
        Ok(())
    }

    /// Applies one packet from the hub.
    pub fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Event { tag, payload } if tag == event_tag::ACCEPTED => {
                match PlayerRef::from_bytes(&payload) {
                    Some(player) => {
                        info!("Connected! Playing as {}", player);
                        self.player = Some(player);
                        self.connected = true;
                    }
                    None => warn!("Acceptance carried a {}-byte player ref", payload.len()),
                }
            }

            Packet::Event { tag, payload } => {
                self.stats.events += 1;
                info!("Event {} ({} bytes)", tag, payload.len());
            }

            Packet::State { record } => match Snapshot::from_bytes(&record) {
                Ok(snapshot) => self.apply_snapshot(snapshot),
                Err(e) => warn!("Undecodable snapshot: {}", e),
            },

            Packet::Message { text } => {
                self.stats.messages += 1;
                info!("Message: {}", text);
            }

            Packet::Disconnect => {
                warn!("Disconnected by server");
                self.connected = false;
                self.player = None;
            }

            Packet::Auth { .. } => {
                warn!("Unexpected packet type");
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if let Some(last) = self.last_sequence {
            if snapshot.sequence <= last {
                self.stats.stale_snapshots += 1;
                debug!("Discarding stale snapshot {}", snapshot.sequence);
                return;
            }
        }

        self.stats.snapshots += 1;
        self.last_sequence = Some(snapshot.sequence);
        debug!(
            "Snapshot {}: {} players, {} states",
            snapshot.sequence,
            snapshot.users,
            snapshot.states.len()
        );
        self.last_snapshot = Some(snapshot);
    }

    async fn send_state(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }

        let mut record = vec![0u8; self.config.record_len];
        rand::thread_rng().fill(&mut record[..]);

        self.send_packet(&Packet::State { record }).await?;
        self.stats.states_sent += 1;
        Ok(())
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }
        self.send_packet(&Packet::Message {
            text: text.to_string(),
        })
        .await
    }

    /// Runs until the hub disconnects us or the configured duration passes.
    pub async fn run(&mut self) -> Result<ClientStats, Box<dyn std::error::Error>> {
        self.connect().await?;

        let period = Duration::from_secs_f64(1.0 / self.config.send_rate.max(1) as f64);
        let mut state_interval = interval(period);
        state_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut chat_interval = interval(self.config.chat_interval);
        chat_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Far enough away to never fire when no duration is set
        let deadline = Instant::now()
            + self
                .config
                .duration
                .unwrap_or(Duration::from_secs(60 * 60 * 24 * 365));
        let stop = sleep_until(deadline);
        tokio::pin!(stop);

        let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match self.codec.decode_frame(&buffer[..len]) {
                            // Also ends a session that was rejected at Auth
                            Ok(Packet::Disconnect) => {
                                self.handle_packet(Packet::Disconnect);
                                break;
                            }
                            Ok(packet) => self.handle_packet(packet),
                            Err(e) => warn!("Dropping bad packet from server: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = state_interval.tick() => {
                    if let Err(e) = self.send_state().await {
                        error!("Error sending state: {}", e);
                    }
                },

                _ = chat_interval.tick(), if self.config.chat.is_some() => {
                    let text = self.config.chat.clone().unwrap_or_default();
                    if let Err(e) = self.send_chat(&text).await {
                        error!("Error sending chat: {}", e);
                    }
                },

                _ = &mut stop => break,
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
            self.connected = false;
        }

        info!("Client stopped: {:?}", self.stats);
        Ok(self.stats)
    }
}
