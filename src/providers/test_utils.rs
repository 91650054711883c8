use super::ProviderError;
use crate::core::{ChannelProvider, OutboundMessage, ProviderReceipt};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fake channel provider for testing
///
/// Responses are queued per recipient address; once a queue is empty the
/// provider accepts the message.
#[derive(Clone)]
pub struct FakeProvider {
    name: String,
    // A queue of responses for a given recipient. The front of the queue is the next response.
    responses: Arc<Mutex<HashMap<String, VecDeque<Result<(), ProviderError>>>>>,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
    latency: Duration,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: Arc::new(Mutex::new(HashMap::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            latency: Duration::ZERO,
        }
    }

    /// Makes every send take `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue an error for the next send to a recipient
    pub fn add_error_response(&self, to: &str, error: ProviderError) {
        let mut responses = self.responses.lock().unwrap();
        responses.entry(to.to_string()).or_default().push_back(Err(error));
    }

    /// Queue the same error `times` times
    pub fn fail_times(&self, to: &str, error: ProviderError, times: usize) {
        for _ in 0..times {
            self.add_error_response(to, error.clone());
        }
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Get the number of send calls for a recipient, failed ones included
    pub fn get_call_count(&self, to: &str) -> u32 {
        self.calls.lock().unwrap().get(to).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ChannelProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(message.to.clone())
            .or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&message.to)
            .and_then(|queue| queue.pop_front());
        if let Some(Err(e)) = next {
            return Err(e);
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(ProviderReceipt {
            message_id: Some(format!("{}-{}", self.name, sent.len())),
        })
    }
}
