use std::sync::Arc;

use crate::message::OutgoingRequest;
use crate::transaction::client::stamp_via;
use crate::transaction::{ClientTransactionHandler, TransactionLayer};
use crate::transport::Transport;

/// Sends an ACK to a 2xx. There is no response to wait for, so the
/// transaction keeps no state and is not added to the table.
#[derive(Clone)]
pub struct AckClientTransaction(Arc<Inner>);

struct Inner {
    transport: Transport,
    request: OutgoingRequest,
    handler: Arc<dyn ClientTransactionHandler>,
}

impl AckClientTransaction {
    pub fn new(
        layer: &Arc<TransactionLayer>,
        mut request: OutgoingRequest,
        handler: Arc<dyn ClientTransactionHandler>,
    ) -> Self {
        stamp_via(layer, &mut request);
        Self(Arc::new(Inner {
            transport: layer.transport().clone(),
            request,
            handler,
        }))
    }

    pub fn send(&self) {
        if !self.0.transport.send(&self.0.request.to_string()) {
            self.on_transport_error();
        }
    }

    pub fn request(&self) -> &OutgoingRequest {
        &self.0.request
    }

    pub(crate) fn on_transport_error(&self) {
        log::debug!("transport error sending ACK");
        self.0.handler.on_transport_error();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMethod;
    use crate::test_utils::transaction::{TransactionEvent, client_context};

    #[tokio::test]
    async fn ack_is_sent_without_entering_the_table() {
        let ctx = client_context(SipMethod::Ack);
        let ack = AckClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        ack.send();

        assert!(ctx.transport.last_message().unwrap().starts_with("ACK "));
        assert_eq!(ctx.layer.count(), 0);
        assert!(ctx.handler.events().is_empty());

        ctx.transport.fail_sends(true);
        ack.send();
        assert_eq!(ctx.handler.events(), [TransactionEvent::TransportError]);
    }
}
