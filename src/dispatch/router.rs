use std::collections::HashMap;
use std::sync::Arc;

use crate::message::Channel;

use super::transport::Transport;

/// Per-channel transport registry.
///
/// A channel with no registered transport is an eligibility failure, not a
/// recorded attempt: the message stays queued until the deployment wires a
/// transport for it.
#[derive(Default)]
pub struct TransportRouter {
    transports: HashMap<Channel, Arc<dyn Transport>>,
}

impl TransportRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(channel, transport);
        self
    }

    pub fn register(&mut self, channel: Channel, transport: Arc<dyn Transport>) {
        self.transports.insert(channel, transport);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn Transport>> {
        self.transports.get(&channel).cloned()
    }
}
