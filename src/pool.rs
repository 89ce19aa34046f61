//! Per-pool lease allocation and the DHCP message state machine.
//!
//! Each pool runs as an independent actor task: a serial consumer of its
//! inbox multiplexed with a periodic expiry sweep. The lease table is owned
//! exclusively by the actor, so it is never locked.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Algorithm, PoolConfig};
use crate::error::{Error, Result};
use crate::message::{BootpOperation, DhcpMessage, HTYPE_ETHERNET};
use crate::net;
use crate::options::{DhcpOption, DhcpType, OptionCode};
use crate::server::DirectedMessage;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// How long a Reserved lease survives without the matching REQUEST.
const OFFER_HOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Reserved,
    InUse,
}

/// The key associating leases to clients: DHCP option 61 when the client
/// sent one, the hardware address otherwise.
#[derive(Debug, Clone)]
pub struct ClientIdentifier {
    id: Vec<u8>,
    mac: Vec<u8>,
}

impl ClientIdentifier {
    pub fn new(id: Vec<u8>, mac: Vec<u8>) -> Self {
        Self { id, mac }
    }

    pub fn from_message(message: &DhcpMessage) -> Self {
        Self {
            id: message.client_identifier().unwrap_or_default(),
            mac: message.chaddr.clone(),
        }
    }
}

impl PartialEq for ClientIdentifier {
    fn eq(&self, other: &Self) -> bool {
        if self.id.is_empty() {
            self.mac == other.mac
        } else {
            self.id == other.id
        }
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, byte) in self.mac.iter().enumerate() {
            if position > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub state: LeaseState,
    pub owner: ClientIdentifier,
    pub expires: Instant,
}

/// A contiguous range of host indices inside one IPv4 subnet, with the
/// lease table tracking which of them are handed out.
pub struct Pool {
    name: String,
    network: Ipv4Net,
    start: u32,
    end: u32,
    lifetime: Duration,
    algorithm: Algorithm,
    leases: HashMap<u32, Lease>,
}

impl Pool {
    pub fn new(name: &str, config: &PoolConfig) -> Self {
        Self {
            name: name.to_string(),
            network: config.network,
            start: config.start,
            end: config.end,
            lifetime: config.lifetime,
            algorithm: config.algorithm,
            leases: HashMap::new(),
        }
    }

    /// The actor loop: drains the inbox and sweeps expired leases every
    /// ten seconds, until the inbox closes.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<DirectedMessage>,
        replies: mpsc::Sender<DirectedMessage>,
    ) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = sweep.tick() => self.expire_leases(Instant::now()),
                received = inbox.recv() => {
                    let Some(message) = received else { break };
                    let server_ip =
                        net::interface_ipv4(message.ifindex).unwrap_or(Ipv4Addr::UNSPECIFIED);
                    if let Some(reply) = self.handle_message(&message, server_ip, Instant::now()) {
                        if replies.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        debug!(pool = %self.name, "pool actor stopped");
    }

    /// Removes every lease whose expiry lies in the past.
    pub fn expire_leases(&mut self, now: Instant) {
        self.leases.retain(|_, lease| {
            if lease.expires <= now {
                info!(pool = %self.name, address = %lease.address, "lease expired");
                false
            } else {
                true
            }
        });
    }

    /// Validates and dispatches one message, producing the reply to enqueue
    /// for transmission, if any.
    pub fn handle_message(
        &mut self,
        message: &DirectedMessage,
        server_ip: Ipv4Addr,
        now: Instant,
    ) -> Option<DirectedMessage> {
        if let Err(reason) = validate(&message.message) {
            warn!(pool = %self.name, reason, "dropping invalid message");
            return None;
        }

        let kind = message.message.message_type();
        match kind {
            DhcpType::Discover => self.handle_discover(message, server_ip, now),
            DhcpType::Request => self.handle_request(message, server_ip, now),
            DhcpType::Release => {
                self.handle_release(message, server_ip);
                None
            }
            DhcpType::Decline | DhcpType::Inform => {
                info!(pool = %self.name, %kind, client = %message.message.mac_display(), "ignoring");
                None
            }
            other => {
                warn!(pool = %self.name, kind = %other, "unhandled message type");
                None
            }
        }
    }

    fn handle_discover(
        &mut self,
        request: &DirectedMessage,
        server_ip: Ipv4Addr,
        now: Instant,
    ) -> Option<DirectedMessage> {
        let client = ClientIdentifier::from_message(&request.message);

        let index = match self.find_client_lease(&client) {
            Some(index) => index,
            None => {
                let Some(index) = self.reserve(&client, now) else {
                    warn!(pool = %self.name, %client, "no free addresses, ignoring DISCOVER");
                    return None;
                };
                index
            }
        };

        let address = self.leases[&index].address;
        info!(pool = %self.name, %client, %address, "offering address");

        let mut offer = DhcpMessage::basic_reply(&request.message, server_ip);
        offer.yiaddr = address;
        offer.options.insert(
            OptionCode::MessageType,
            DhcpOption::U8List(vec![DhcpType::Offer as u8]),
        );
        self.apply_envelope(&mut offer, server_ip);

        Some(request.reply_with(offer))
    }

    fn handle_request(
        &mut self,
        request: &DirectedMessage,
        server_ip: Ipv4Addr,
        now: Instant,
    ) -> Option<DirectedMessage> {
        let client = ClientIdentifier::from_message(&request.message);
        let selected_server = request.message.server_identifier();

        let requested = match request.message.requested_ip() {
            Some(address) => address,
            None if request.message.ciaddr != Ipv4Addr::UNSPECIFIED => request.message.ciaddr,
            None => {
                warn!(pool = %self.name, %client, "REQUEST without a requested address");
                return None;
            }
        };

        if let Some(selected) = selected_server {
            if selected != server_ip {
                info!(pool = %self.name, %client, %selected, "client selected another server, freeing its leases");
                self.free_client_leases(&client);
                return None;
            }
        }

        // NAKs only answer SELECTING clients; INIT-REBOOT, RENEWING, and
        // REBINDING requests without a server identifier fail silently.
        let selecting = selected_server.is_some();

        let index = match self.index_from_address(requested) {
            Ok(index) => index,
            Err(_) => {
                return selecting
                    .then(|| self.nak(request, server_ip, "requested address is not in this pool"));
            }
        };

        match self.leases.get(&index) {
            None => {
                return selecting
                    .then(|| self.nak(request, server_ip, "no lease for the requested address"));
            }
            Some(lease) if lease.owner != client => {
                return selecting.then(|| {
                    self.nak(
                        request,
                        server_ip,
                        "requested address is leased to another client",
                    )
                });
            }
            Some(_) => {}
        }

        let lifetime = self.lifetime;
        let lease = self.leases.get_mut(&index)?;
        lease.state = LeaseState::InUse;
        lease.expires = now + lifetime;
        let address = lease.address;

        info!(pool = %self.name, %client, %address, "acknowledging lease");

        let mut ack = DhcpMessage::basic_reply(&request.message, server_ip);
        ack.yiaddr = address;
        ack.options.insert(
            OptionCode::MessageType,
            DhcpOption::U8List(vec![DhcpType::Ack as u8]),
        );
        self.apply_envelope(&mut ack, server_ip);

        Some(request.reply_with(ack))
    }

    fn handle_release(&mut self, request: &DirectedMessage, server_ip: Ipv4Addr) {
        if request.message.siaddr != server_ip {
            debug!(pool = %self.name, siaddr = %request.message.siaddr, "RELEASE for another server, ignoring");
            return;
        }

        let client = ClientIdentifier::from_message(&request.message);
        self.free_client_leases(&client);
    }

    fn nak(&self, request: &DirectedMessage, server_ip: Ipv4Addr, reason: &str) -> DirectedMessage {
        warn!(pool = %self.name, client = %request.message.mac_display(), reason, "sending NAK");

        let mut nak = DhcpMessage::basic_reply(&request.message, server_ip);
        nak.options.insert(
            OptionCode::MessageType,
            DhcpOption::U8List(vec![DhcpType::Nak as u8]),
        );
        nak.options
            .insert(OptionCode::Message, DhcpOption::Text(reason.to_string()));

        request.reply_with(nak)
    }

    /// The parameter envelope shared by OFFER and ACK.
    fn apply_envelope(&self, reply: &mut DhcpMessage, server_ip: Ipv4Addr) {
        reply.options.insert(
            OptionCode::SubnetMask,
            DhcpOption::Ipv4List(vec![self.network.netmask()]),
        );
        reply
            .options
            .insert(OptionCode::Router, DhcpOption::Ipv4List(vec![server_ip]));
        reply.options.insert(
            OptionCode::DomainNameServer,
            DhcpOption::Ipv4List(vec![server_ip]),
        );
        reply.options.insert(
            OptionCode::AddressLeaseTime,
            DhcpOption::Duration(self.lifetime),
        );
    }

    fn reserve(&mut self, client: &ClientIdentifier, now: Instant) -> Option<u32> {
        let free = self.free_indices();
        if free.is_empty() {
            return None;
        }

        let index = match self.algorithm {
            Algorithm::Sequential => free[0],
            Algorithm::Random => free[rand::rng().random_range(0..free.len())],
        };

        self.leases.insert(
            index,
            Lease {
                address: self.address_from_index(index),
                state: LeaseState::Reserved,
                owner: client.clone(),
                expires: now + OFFER_HOLD,
            },
        );

        Some(index)
    }

    fn free_indices(&self) -> Vec<u32> {
        (self.start..=self.end)
            .filter(|index| !self.leases.contains_key(index))
            .collect()
    }

    fn find_client_lease(&self, client: &ClientIdentifier) -> Option<u32> {
        self.leases
            .iter()
            .find(|(_, lease)| lease.owner == *client)
            .map(|(&index, _)| index)
    }

    fn free_client_leases(&mut self, client: &ClientIdentifier) {
        self.leases.retain(|_, lease| {
            if lease.owner == *client {
                info!(pool = %self.name, address = %lease.address, "freeing lease");
                false
            } else {
                true
            }
        });
    }

    fn network_base(&self) -> u32 {
        u32::from(self.network.network())
    }

    /// The address for a host index, combining the network's host-zero
    /// address with the index.
    pub fn address_from_index(&self, index: u32) -> Ipv4Addr {
        Ipv4Addr::from(self.network_base() | index)
    }

    /// The host index for an address, failing unless the address belongs
    /// to this pool's network and lands inside the configured range.
    pub fn index_from_address(&self, address: Ipv4Addr) -> Result<u32> {
        let raw = u32::from(address);
        let mask = u32::from(self.network.netmask());

        if raw & mask != self.network_base() {
            return Err(Error::AddressOutOfRange(address));
        }

        let index = raw & !mask;
        if index < self.start || index > self.end {
            return Err(Error::AddressOutOfRange(address));
        }

        Ok(index)
    }

    pub fn lease(&self, index: u32) -> Option<&Lease> {
        self.leases.get(&index)
    }

    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }
}

fn validate(message: &DhcpMessage) -> std::result::Result<(), &'static str> {
    if message.operation != BootpOperation::Request {
        return Err("operation is not BOOTREQUEST");
    }

    if message.hw_type != HTYPE_ETHERNET {
        return Err("hardware type is not ethernet");
    }

    Ok(())
}
