use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::transport::{SipTransport, Transport};

/// A mock transport, for testing purposes. Records what is sent.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
    unreliable: AtomicBool,
    connected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            ..Default::default()
        })
    }

    pub fn into_transport(self: Arc<Self>) -> Transport {
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_message(&self) -> Option<String> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Makes every following send fail, or succeed again.
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_reliable(&self, reliable: bool) {
        self.unreliable.store(!reliable, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl SipTransport for MockTransport {
    async fn connect(&self) {
        self.set_connected(true);
    }

    async fn disconnect(&self) {
        self.set_connected(false);
    }

    fn send(&self, message: &str) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(message.to_owned());
        true
    }

    fn via_transport(&self) -> String {
        "WS".into()
    }

    fn sip_uri(&self) -> String {
        "sip:edge.example.com;transport=ws".into()
    }

    fn is_reliable(&self) -> bool {
        !self.unreliable.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
