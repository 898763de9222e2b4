//! Hand-written fakes for lifecycle tests that need to pause mid-connect.

use crate::error::CredentialError;
use crate::protocol::{ClientEvent, TurnDetection};
use crate::transport::{ConnectOptions, Credential, CredentialProvider, RealtimeTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Lets a test observe that a call started and decide when it finishes.
#[derive(Debug, Default)]
pub struct Gate {
    pub started: Notify,
    pub release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.started.notify_one();
        self.release.notified().await;
    }
}

pub struct FakeCredentials {
    result: Result<String, CredentialError>,
    gate: Option<Arc<Gate>>,
    calls: AtomicUsize,
}

impl FakeCredentials {
    pub fn ok(value: &str) -> Self {
        Self {
            result: Ok(value.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: CredentialError) -> Self {
        Self {
            result: Err(err),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(value: &str) -> Self {
        Self {
            gate: Some(Arc::new(Gate::default())),
            ..Self::ok(value)
        }
    }

    pub fn gate(&self) -> Arc<Gate> {
        self.gate.clone().expect("credentials are not gated")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn fetch_credential(&self) -> Result<Credential, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        self.result.clone().map(Credential::new)
    }
}

/// What the transport was asked to connect with.
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub epoch: u64,
    pub credential: String,
    pub roster: Vec<String>,
    pub company_name: String,
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Debug, Default)]
struct Recorded {
    connects: Vec<ConnectRecord>,
    sent: Vec<ClientEvent>,
    mutes: Vec<bool>,
    disconnects: usize,
    releases: Vec<u64>,
    interrupts: usize,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    recorded: Mutex<Recorded>,
    fail_with: Option<String>,
    gate: Option<Arc<Gate>>,
}

impl FakeTransport {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Gate::default())),
            ..Default::default()
        }
    }

    pub fn gate(&self) -> Arc<Gate> {
        self.gate.clone().expect("transport is not gated")
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.recorded.lock().connects.clone()
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.recorded.lock().sent.clone()
    }

    pub fn mutes(&self) -> Vec<bool> {
        self.recorded.lock().mutes.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.recorded.lock().disconnects
    }

    pub fn releases(&self) -> Vec<u64> {
        self.recorded.lock().releases.clone()
    }

    pub fn interrupts(&self) -> usize {
        self.recorded.lock().interrupts
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(&self, options: ConnectOptions) -> anyhow::Result<()> {
        self.recorded.lock().connects.push(ConnectRecord {
            epoch: options.epoch,
            credential: options.credential.expose().to_string(),
            roster: options
                .initial_roster
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            company_name: options.output_guardrail.company_name().to_string(),
            turn_detection: options.session_defaults.turn_detection.clone(),
        });
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        match &self.fail_with {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn disconnect(&self) {
        self.recorded.lock().disconnects += 1;
    }

    fn release(&self, epoch: u64) {
        self.recorded.lock().releases.push(epoch);
    }

    fn send_event(&self, event: ClientEvent) {
        self.recorded.lock().sent.push(event);
    }

    fn interrupt(&self) {
        self.recorded.lock().interrupts += 1;
    }

    fn mute(&self, muted: bool) {
        self.recorded.lock().mutes.push(muted);
    }
}
