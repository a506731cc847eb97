//! Common test utilities for promobot integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;

use promobot_service::{create_router, AppState, ServiceConfig};
use promobot_store::{MemoryStore, Store};
use promobot_telegram::{InlineButton, Messenger, TransportError};

/// Outbound messenger that records every delivery instead of sending it.
#[derive(Default)]
pub struct RecordingMessenger {
    /// `(chat_id, text)` pairs in send order.
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingMessenger {
    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        _buttons: Vec<Vec<InlineButton>>,
    ) -> Result<(), TransportError> {
        self.send_text(chat_id, text).await
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        _text: Option<&str>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for direct assertions.
    pub store: Arc<MemoryStore>,
    /// The recording notification sink.
    pub messenger: Arc<RecordingMessenger>,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let messenger = Arc::new(RecordingMessenger::default());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            ..ServiceConfig::default()
        };

        let state = AppState::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(promobot_core::PlanCatalog::default()),
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            config,
        );
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            messenger,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
