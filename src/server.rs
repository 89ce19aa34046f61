//! The daemon's task plumbing: the receiver and sender loops that bridge
//! the pktinfo socket to typed message channels, and the dispatcher that
//! routes each message to the pool owning its arrival interface.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::message::DhcpMessage;
use crate::net;
use crate::pool::Pool;
use crate::transport::{PktInfoSocket, DHCP_CLIENT_PORT};

const CHANNEL_CAPACITY: usize = 10;

/// DHCP minimum MTU; clients may not send anything larger.
const RECV_BUFFER_SIZE: usize = 576;

/// A DHCP message tied to the interface it arrived on (or must leave by)
/// and the peer that sent it.
#[derive(Debug, Clone)]
pub struct DirectedMessage {
    pub message: DhcpMessage,
    pub ifindex: u32,
    pub peer: SocketAddrV4,
}

impl DirectedMessage {
    /// Wraps a reply for transmission out the same interface.
    pub fn reply_with(&self, message: DhcpMessage) -> Self {
        Self {
            message,
            ifindex: self.ifindex,
            peer: self.peer,
        }
    }
}

/// Spawns the receive loop: datagrams in, decoded `DirectedMessage`s out.
/// The returned channel closes when the transport fails.
pub fn spawn_receiver(socket: Arc<PktInfoSocket>) -> mpsc::Receiver<DirectedMessage> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            let (length, peer, ifindex) = match socket.recv(&mut buffer).await {
                Ok(received) => received,
                Err(error) => {
                    error!(%error, "transport read failed, stopping receiver");
                    break;
                }
            };

            let message = match DhcpMessage::decode(&buffer[..length]) {
                Ok(message) => message,
                Err(error) => {
                    warn!(%peer, %error, "dropping undecodable datagram");
                    continue;
                }
            };

            if tx
                .send(DirectedMessage {
                    message,
                    ifindex,
                    peer,
                })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    rx
}

/// Spawns the send loop: every queued reply is encoded and broadcast to
/// 255.255.255.255:68 out the interface recorded in the message.
pub fn spawn_sender(
    socket: Arc<PktInfoSocket>,
    mut inbox: mpsc::Receiver<DirectedMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let broadcast = SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT);

        while let Some(outgoing) = inbox.recv().await {
            let bytes = match outgoing.message.encode() {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(%error, "unable to encode reply, dropping");
                    continue;
                }
            };

            if let Err(error) = socket.send(&bytes, broadcast, outgoing.ifindex).await {
                warn!(%error, ifindex = outgoing.ifindex, "unable to send reply");
            }
        }

        debug!("sender stopped");
    })
}

/// Owns the socket, the pool actors, and the interface routing table.
pub struct Dispatcher {
    receiver: mpsc::Receiver<DirectedMessage>,
    routes: HashMap<u32, mpsc::Sender<DirectedMessage>>,
    pool_tasks: Vec<JoinHandle<()>>,
    sender_task: JoinHandle<()>,
}

impl Dispatcher {
    /// Binds the transport and starts one actor per configured pool.
    /// Fails when the socket cannot be bound, IP_PKTINFO cannot be
    /// enabled, or a configured interface does not exist.
    pub fn new(config: Config) -> Result<Self> {
        let socket = Arc::new(PktInfoSocket::bind()?);
        let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let sender_task = spawn_sender(Arc::clone(&socket), reply_rx);
        let receiver = spawn_receiver(socket);

        let mut routes = HashMap::new();
        let mut pool_tasks = Vec::new();

        for (name, pool_config) in &config.pools {
            let (inbox_tx, inbox_rx) = mpsc::channel(CHANNEL_CAPACITY);

            for interface in &pool_config.interfaces {
                let index = net::interface_index(interface)?;
                info!(pool = %name, %interface, index, "serving interface");
                routes.insert(index, inbox_tx.clone());
            }

            let pool = Pool::new(name, pool_config);
            pool_tasks.push(tokio::spawn(pool.run(inbox_rx, reply_tx.clone())));
        }

        Ok(Self {
            receiver,
            routes,
            pool_tasks,
            sender_task,
        })
    }

    /// The dispatch loop: forwards each received message to the pool that
    /// owns its arrival interface until a termination signal arrives or
    /// the receiver dies, then closes every inbox and drains the tasks.
    pub async fn run(mut self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigquit = signal(SignalKind::quit())?;

        loop {
            tokio::select! {
                received = self.receiver.recv() => {
                    let Some(message) = received else {
                        error!("receiver channel closed, shutting down");
                        break;
                    };

                    let Some(inbox) = self.routes.get(&message.ifindex) else {
                        debug!(ifindex = message.ifindex, "ignoring packet from unserved interface");
                        continue;
                    };

                    if inbox.send(message).await.is_err() {
                        warn!("pool inbox closed, dropping message");
                    }
                }
                _ = sigint.recv() => {
                    info!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received");
                    break;
                }
                _ = sigquit.recv() => {
                    info!("SIGQUIT received");
                    break;
                }
            }
        }

        info!("shutting down");
        drop(self.routes);
        for task in self.pool_tasks {
            let _ = task.await;
        }
        let _ = self.sender_task.await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{Algorithm, PoolConfig};
    use crate::message::{BootpOperation, HTYPE_ETHERNET};
    use crate::options::{DhcpOption, DhcpOptions, DhcpType, OptionCode};

    fn discover() -> DirectedMessage {
        let mut options = DhcpOptions::new();
        options.insert(
            OptionCode::MessageType,
            DhcpOption::U8List(vec![DhcpType::Discover as u8]),
        );

        DirectedMessage {
            message: DhcpMessage {
                operation: BootpOperation::Request,
                hw_type: HTYPE_ETHERNET,
                hops: 0,
                transaction_id: 0xdeadbeef,
                seconds: Duration::ZERO,
                flags: 0x8000,
                ciaddr: Ipv4Addr::UNSPECIFIED,
                yiaddr: Ipv4Addr::UNSPECIFIED,
                siaddr: Ipv4Addr::UNSPECIFIED,
                giaddr: Ipv4Addr::UNSPECIFIED,
                chaddr: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
                sname: String::new(),
                file: String::new(),
                options,
            },
            ifindex: 4242,
            peer: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68),
        }
    }

    #[test]
    fn reply_with_preserves_direction() {
        let request = discover();
        let reply = request.reply_with(request.message.clone());

        assert_eq!(reply.ifindex, request.ifindex);
        assert_eq!(reply.peer, request.peer);
    }

    #[tokio::test]
    async fn pool_actor_answers_over_channels() {
        let config = PoolConfig {
            interfaces: vec!["test0".to_string()],
            network: "192.168.99.0/24".parse().unwrap(),
            start: 2,
            end: 99,
            algorithm: Algorithm::Sequential,
            lifetime: Duration::from_secs(86400),
        };
        let pool = Pool::new("test", &config);

        let (inbox_tx, inbox_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (reply_tx, mut reply_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(pool.run(inbox_rx, reply_tx));

        inbox_tx.send(discover()).await.unwrap();

        let offer = reply_rx.recv().await.expect("pool should reply");
        assert_eq!(offer.message.message_type(), DhcpType::Offer);
        assert_eq!(offer.ifindex, 4242);
        assert_eq!(offer.message.yiaddr, Ipv4Addr::new(192, 168, 99, 2));

        drop(inbox_tx);
        task.await.unwrap();
        assert!(reply_rx.recv().await.is_none());
    }
}
