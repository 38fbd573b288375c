//! The acting identity, passed explicitly to every coordinator call path.

use std::sync::Arc;

use ownables_event_chain::Signer;
use ownables_sandbox::MessageInfo;

/// Who is acting, on which network, and whether their chains get anchored.
#[derive(Clone)]
pub struct Session {
    signer: Arc<dyn Signer>,
    network_id: String,
    anchoring: bool,
}

impl Session {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            network_id: "T".to_string(),
            anchoring: false,
        }
    }

    pub fn with_network_id(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = network_id.into();
        self
    }

    pub fn with_anchoring(mut self, anchoring: bool) -> Self {
        self.anchoring = anchoring;
        self
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    /// Address modules see as the message sender.
    pub fn sender(&self) -> String {
        self.signer.public_key().to_hex()
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn anchoring(&self) -> bool {
        self.anchoring
    }

    pub fn message_info(&self) -> MessageInfo {
        MessageInfo::new(self.sender())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sender", &self.sender())
            .field("network_id", &self.network_id)
            .field("anchoring", &self.anchoring)
            .finish()
    }
}
