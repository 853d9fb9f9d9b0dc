//! Application layer seam for servers.
//!
//! A [`ChannelService`] decides whether to accept each Open and consumes
//! delivered payloads. [`dispatch`] runs registry actions through a service
//! until only packets to send remain, so a server driver is just
//! receive → `handle_datagram` → `dispatch` → send.

use std::collections::VecDeque;

use bytes::Bytes;
use ngt_proto::{Capabilities, Packet};
use tracing::{debug, warn};

use crate::{
    error::{CloseReason, ConnectionError},
    registry::{ChannelRegistry, RegistryAction, SharedRegistry},
};

/// Answer to an Open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDecision {
    /// Accept, negotiating against the registry's supported set
    Accept,
    /// Echo the Open back as a Kill
    Reject,
}

/// Application callbacks for a server.
///
/// Callbacks run without any registry lock held.
pub trait ChannelService {
    /// A peer asked to open `channel`
    fn on_open(&mut self, channel: u16, requested: Capabilities) -> OpenDecision;

    /// The connection on `channel` is open
    fn on_established(&mut self, channel: u16, capabilities: Capabilities) {
        let _ = (channel, capabilities);
    }

    /// Fresh payload on `channel`. A returned body is sent back as
    /// DataExchange on the same channel.
    fn on_data(&mut self, channel: u16, body: Bytes) -> Option<Bytes>;

    /// The connection on `channel` ended
    fn on_closed(&mut self, channel: u16, reason: CloseReason) {
        let _ = (channel, reason);
    }
}

/// A packet ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing<P> {
    /// Destination
    pub peer: P,
    /// Packet to encode
    pub packet: Packet,
}

enum Followup {
    Accept(u16),
    Reject(u16),
    Reply(u16, Bytes),
}

impl Followup {
    fn apply<P>(
        self,
        registry: &mut ChannelRegistry<P>,
    ) -> Result<Vec<RegistryAction<P>>, ConnectionError>
    where
        P: Clone + Eq + std::fmt::Debug,
    {
        match self {
            Self::Accept(channel) => registry.accept(channel),
            Self::Reject(channel) => registry.reject(channel),
            Self::Reply(channel, body) => registry.send_data(channel, body),
        }
    }
}

/// Run `actions` through `service` and collect the packets to send.
///
/// Service answers (accept, reject, replies) are applied to the registry and
/// their actions processed in turn, in order.
pub fn dispatch<P, S>(
    registry: &mut ChannelRegistry<P>,
    service: &mut S,
    actions: Vec<RegistryAction<P>>,
) -> Vec<Outgoing<P>>
where
    P: Clone + Eq + std::fmt::Debug,
    S: ChannelService + ?Sized,
{
    run(service, actions, |followup| followup.apply(registry))
}

/// Same as [`dispatch`], taking the lock once per registry operation.
pub fn dispatch_shared<P, S>(
    registry: &SharedRegistry<P>,
    service: &mut S,
    actions: Vec<RegistryAction<P>>,
) -> Vec<Outgoing<P>>
where
    P: Clone + Eq + std::fmt::Debug,
    S: ChannelService + ?Sized,
{
    run(service, actions, |followup| registry.with(|inner| followup.apply(inner)))
}

fn run<P, S, F>(service: &mut S, actions: Vec<RegistryAction<P>>, mut apply: F) -> Vec<Outgoing<P>>
where
    S: ChannelService + ?Sized,
    F: FnMut(Followup) -> Result<Vec<RegistryAction<P>>, ConnectionError>,
{
    let mut queue: VecDeque<_> = actions.into();
    let mut outgoing = Vec::new();

    while let Some(action) = queue.pop_front() {
        let followup = match action {
            RegistryAction::Send { peer, packet } => {
                outgoing.push(Outgoing { peer, packet });
                None
            },
            RegistryAction::OpenRequested { channel, requested, .. } => {
                match service.on_open(channel, requested) {
                    OpenDecision::Accept => Some(Followup::Accept(channel)),
                    OpenDecision::Reject => Some(Followup::Reject(channel)),
                }
            },
            RegistryAction::Established { channel, capabilities } => {
                service.on_established(channel, capabilities);
                None
            },
            RegistryAction::Deliver { channel, body } => {
                service.on_data(channel, body).map(|reply| Followup::Reply(channel, reply))
            },
            RegistryAction::Released { channel, reason, .. } => {
                service.on_closed(channel, reason);
                None
            },
            RegistryAction::Refused { channel, violation, .. } => {
                debug!(channel, %violation, "open refused");
                None
            },
            RegistryAction::Dropped { reason } => {
                debug!(?reason, "datagram dropped");
                None
            },
        };

        if let Some(followup) = followup {
            match apply(followup) {
                Ok(more) => queue.extend(more),
                Err(err) => warn!(%err, "service answer could not be applied"),
            }
        }
    }

    outgoing
}
