//! Stub collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use extpreimage::{
    PaymentHash, Preimage, PreimageRequest, PreimageRetriever, RetrievalError, TemporaryError,
};

use crate::error::{InvoiceStoreError, PaymentHashError, WitnessCacheError};
use crate::invoice::{Invoice, InvoiceDatabase, InvoiceRegistry, PreimageResolver};
use crate::witness::{WitnessCache, WitnessType};

fn exhausted() -> RetrievalError {
    TemporaryError::StreamClosedEarly.into()
}

/// Retriever that replays queued outcomes; temporary once exhausted.
#[derive(Default)]
pub struct ScriptedRetriever {
    outcomes: Mutex<VecDeque<extpreimage::Result<Preimage>>>,
    requests: Mutex<Vec<PreimageRequest>>,
}

impl ScriptedRetriever {
    pub fn push(&self, outcome: extpreimage::Result<Preimage>) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }

    pub fn requests(&self) -> Vec<PreimageRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PreimageRetriever for ScriptedRetriever {
    async fn retrieve(&self, request: &PreimageRequest) -> extpreimage::Result<Preimage> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(*request);
        }
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| Err(exhausted()))
    }

    async fn stop(&self) {}
}

/// Retriever whose calls never complete.
pub struct StalledRetriever;

#[async_trait]
impl PreimageRetriever for StalledRetriever {
    async fn retrieve(&self, _request: &PreimageRequest) -> extpreimage::Result<Preimage> {
        std::future::pending().await
    }

    async fn stop(&self) {}
}

/// Resolver that replays queued outcomes on each tick.
pub struct ScriptedResolver {
    payment_hash: PaymentHash,
    outcomes: Mutex<VecDeque<extpreimage::Result<Preimage>>>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedResolver {
    pub fn new(
        payment_hash: PaymentHash,
        outcomes: impl IntoIterator<Item = extpreimage::Result<Preimage>>,
    ) -> Self {
        Self {
            payment_hash,
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<(u32, u32)> {
        self.contexts
            .lock()
            .map(|contexts| contexts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PreimageResolver for ScriptedResolver {
    fn payment_hash(&self) -> Result<PaymentHash, PaymentHashError> {
        Ok(self.payment_hash)
    }

    async fn payment_preimage(
        &self,
        time_lock: u32,
        current_height: u32,
        _client: Option<&dyn PreimageRetriever>,
        _registry: &dyn InvoiceRegistry,
    ) -> extpreimage::Result<Preimage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push((time_lock, current_height));
        }
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| Err(exhausted()))
    }
}

pub struct FailingRegistry;

#[async_trait]
impl InvoiceRegistry for FailingRegistry {
    async fn add_invoice_preimage(
        &self,
        _payment_hash: PaymentHash,
        _preimage: Preimage,
    ) -> Result<(), InvoiceStoreError> {
        Err(InvoiceStoreError::Db("registry offline".to_string()))
    }
}

#[async_trait]
impl InvoiceDatabase for FailingRegistry {
    async fn lookup_invoice(
        &self,
        _payment_hash: &PaymentHash,
    ) -> Result<(Invoice, u32), InvoiceStoreError> {
        Err(InvoiceStoreError::Db("registry offline".to_string()))
    }
}

/// Witness cache whose writes always fail.
pub struct FailingWitnessCache;

#[async_trait]
impl WitnessCache for FailingWitnessCache {
    async fn lookup_witness(
        &self,
        _kind: WitnessType,
        _key: &[u8],
    ) -> Result<Vec<u8>, WitnessCacheError> {
        Err(WitnessCacheError::Db("cache offline".to_string()))
    }

    async fn add_witness(
        &self,
        _kind: WitnessType,
        _witness: &[u8],
    ) -> Result<(), WitnessCacheError> {
        Err(WitnessCacheError::Db("cache offline".to_string()))
    }
}

/// Witness cache that returns a truncated witness for every key.
pub struct MalformedWitnessCache;

#[async_trait]
impl WitnessCache for MalformedWitnessCache {
    async fn lookup_witness(
        &self,
        _kind: WitnessType,
        _key: &[u8],
    ) -> Result<Vec<u8>, WitnessCacheError> {
        Ok(vec![7u8; 31])
    }

    async fn add_witness(
        &self,
        _kind: WitnessType,
        _witness: &[u8],
    ) -> Result<(), WitnessCacheError> {
        Ok(())
    }
}
