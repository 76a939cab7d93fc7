//! Preimage beacon.
//!
//! The beacon is the single place preimages are discovered and announced.
//! Lookups consult the invoice store first and fall back to the witness
//! cache; external preimages that are not yet available are retried by a
//! background poll, and every preimage added to the cache is fanned out to
//! the current subscribers.
//!
//! All subscriber and poll bookkeeping happens under one `RwLock`: lookups
//! take it shared, registration and `add_preimage` take it exclusively. The
//! lock is never held across a call to the external service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use extpreimage::{PaymentHash, Preimage, PreimageRetriever, RetrievalError, TemporaryError};
use futures::StreamExt;
use tokio::sync::{RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::BeaconConfig;
use crate::error::{InvoiceStoreError, WitnessCacheError};
use crate::invoice::{InvoiceDatabase, InvoiceRegistry, PreimageResolver};
use crate::subscription::{Delivery, DeliveryOutcome, Subscriber, WitnessSubscription};
use crate::witness::{WitnessCache, WitnessType};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const DELIVERY_CONCURRENCY: usize = 16;

/// How a background poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The preimage was resolved and handed to `add_preimage`.
    Resolved(Preimage),
    /// Resolution failed permanently; the hash will not resolve this way.
    PermanentFailure,
    /// The beacon was stopped.
    Cancelled,
    /// Another poll already owns this payment hash.
    AlreadyPending,
}

/// Surface the beacon exposes to the rest of the node.
#[async_trait]
pub trait WitnessBeacon: Send + Sync {
    async fn subscribe_updates(&self) -> WitnessSubscription;

    async fn lookup_preimage(&self, payment_hash: &PaymentHash) -> Option<Preimage>;

    async fn add_preimage(&self, preimage: Preimage) -> Result<(), WitnessCacheError>;
}

#[derive(Default)]
struct BeaconState {
    next_subscriber_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    next_poll_id: u64,
    polls: HashMap<u64, oneshot::Sender<()>>,
    /// Payment hash to the poll retrying it; at most one poll per hash.
    pending: HashMap<PaymentHash, u64>,
    stopped: bool,
}

enum Registration {
    Registered(u64, oneshot::Receiver<()>),
    AlreadyPending(u64),
    Stopped,
}

struct BeaconInner {
    config: BeaconConfig,
    invoices: Arc<dyn InvoiceDatabase>,
    registry: Arc<dyn InvoiceRegistry>,
    witness_cache: Arc<dyn WitnessCache>,
    client: Option<Arc<dyn PreimageRetriever>>,
    state: RwLock<BeaconState>,
    /// Spawned poll tasks that have not yet exited.
    running_polls: watch::Sender<usize>,
}

/// Counts a spawned poll task until it is dropped.
struct RunningPoll(Arc<BeaconInner>);

impl RunningPoll {
    fn start(inner: &Arc<BeaconInner>) -> Self {
        inner.running_polls.send_modify(|count| *count += 1);
        Self(Arc::clone(inner))
    }
}

impl Drop for RunningPoll {
    fn drop(&mut self) {
        self.0
            .running_polls
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[derive(Clone)]
pub struct PreimageBeacon {
    inner: Arc<BeaconInner>,
}

impl PreimageBeacon {
    /// `client` is `None` when no external preimage service is configured;
    /// external invoices then stay pending until one is.
    pub fn new<I>(
        config: BeaconConfig,
        invoices: Arc<I>,
        witness_cache: Arc<dyn WitnessCache>,
        client: Option<Arc<dyn PreimageRetriever>>,
    ) -> Self
    where
        I: InvoiceDatabase + 'static,
    {
        let registry: Arc<dyn InvoiceRegistry> = invoices.clone();
        let (running_polls, _) = watch::channel(0);
        Self {
            inner: Arc::new(BeaconInner {
                config,
                invoices,
                registry,
                witness_cache,
                client,
                state: RwLock::new(BeaconState::default()),
                running_polls,
            }),
        }
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.inner.config
    }

    pub async fn subscribe_updates(&self) -> WitnessSubscription {
        let (subscriber, updates) = Subscriber::new(self.inner.config.subscriber_buffer);

        let mut state = self.inner.state.write().await;
        let subscriber_id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.insert(subscriber_id, subscriber);
        drop(state);

        debug!(subscriber_id, "created new witness beacon subscriber");
        WitnessSubscription::new(subscriber_id, updates, self.clone())
    }

    pub(crate) async fn cancel_subscription(&self, subscriber_id: u64) {
        let mut state = self.inner.state.write().await;
        if let Some(subscriber) = state.subscribers.remove(&subscriber_id) {
            subscriber.cancel();
            debug!(subscriber_id, "cancelled witness beacon subscriber");
        }
    }

    /// Returns the preimage for `payment_hash` if it is known right now.
    ///
    /// External preimages that cannot be fetched yet are reported as unknown
    /// and retried in the background; a later `add_preimage` announces them
    /// to subscribers.
    pub async fn lookup_preimage(&self, payment_hash: &PaymentHash) -> Option<Preimage> {
        let state = self.inner.state.read().await;

        match self.inner.invoices.lookup_invoice(payment_hash).await {
            Ok((invoice, _)) => {
                // Resolution may wait on the external service.
                drop(state);
                let terms = invoice.terms;
                return match self.resolve(&terms).await {
                    Ok(preimage) => Some(preimage),
                    Err(RetrievalError::Permanent(err)) => {
                        error!(
                            payment_hash = %payment_hash,
                            error = %err,
                            "permanent failure resolving invoice preimage"
                        );
                        None
                    }
                    Err(RetrievalError::Temporary(err)) => {
                        error!(
                            payment_hash = %payment_hash,
                            error = %err,
                            "temporary failure resolving invoice preimage, scheduling poll"
                        );
                        self.schedule_poll(Arc::new(terms), self.inner.config.poll_interval);
                        None
                    }
                };
            }
            Err(InvoiceStoreError::NotFound) => {}
            Err(err) => {
                error!(payment_hash = %payment_hash, error = %err, "unable to look up invoice");
                return None;
            }
        }

        let witness = self
            .inner
            .witness_cache
            .lookup_witness(WitnessType::Sha256Hash, payment_hash.as_ref())
            .await;
        drop(state);

        match witness {
            Ok(witness) => match Preimage::try_from(witness.as_slice()) {
                Ok(preimage) => Some(preimage),
                Err(err) => {
                    error!(payment_hash = %payment_hash, error = %err, "malformed cached witness");
                    None
                }
            },
            Err(WitnessCacheError::NotFound) => None,
            Err(err) => {
                error!(payment_hash = %payment_hash, error = %err, "unable to look up witness");
                None
            }
        }
    }

    /// Persists `preimage` to the witness cache and announces it to every
    /// registered subscriber. Nothing is announced if the write fails.
    pub async fn add_preimage(&self, preimage: Preimage) -> Result<(), WitnessCacheError> {
        let mut state = self.inner.state.write().await;

        let payment_hash = preimage.payment_hash();
        info!(payment_hash = %payment_hash, "adding preimage to witness cache");

        self.inner
            .witness_cache
            .add_witness(WitnessType::Sha256Hash, preimage.as_ref())
            .await?;

        state.subscribers.retain(|subscriber_id, subscriber| {
            let closed = subscriber.is_closed();
            if closed {
                debug!(subscriber_id = *subscriber_id, "dropping subscriber with closed stream");
            }
            !closed
        });
        let deliveries: Vec<Delivery> = state
            .subscribers
            .iter()
            .map(|(subscriber_id, subscriber)| subscriber.delivery(*subscriber_id))
            .collect();
        drop(state);

        if !deliveries.is_empty() {
            tokio::spawn(dispatch(
                deliveries,
                preimage,
                self.inner.config.delivery_timeout,
            ));
        }
        Ok(())
    }

    /// Spawns a background poll for `resolver`.
    pub fn schedule_poll(
        &self,
        resolver: Arc<dyn PreimageResolver>,
        interval: Duration,
    ) -> JoinHandle<PollOutcome> {
        let running = RunningPoll::start(&self.inner);
        let beacon = self.clone();
        tokio::spawn(async move {
            let _running = running;
            beacon.poll_extpreimage(resolver, interval).await
        })
    }

    /// Retries `resolver` every `interval` until it succeeds, fails
    /// permanently, or the beacon is stopped. The first attempt happens one
    /// interval after the poll starts.
    pub async fn poll_extpreimage(
        &self,
        resolver: Arc<dyn PreimageResolver>,
        interval: Duration,
    ) -> PollOutcome {
        let payment_hash = resolver.payment_hash().ok();
        let (poll_id, mut quit) = match self.register_poll(payment_hash).await {
            Registration::Registered(poll_id, quit) => (poll_id, quit),
            Registration::AlreadyPending(existing) => {
                debug!(poll_id = existing, "extpreimage poll already pending for hash");
                return PollOutcome::AlreadyPending;
            }
            Registration::Stopped => {
                trace!("beacon stopped, not starting extpreimage poll");
                return PollOutcome::Cancelled;
            }
        };
        debug!(poll_id, "started extpreimage poll");

        let outcome = self
            .run_poll(poll_id, resolver.as_ref(), interval, &mut quit)
            .await;

        let mut state = self.inner.state.write().await;
        state.polls.remove(&poll_id);
        if let Some(hash) = payment_hash.filter(|hash| state.pending.get(hash) == Some(&poll_id)) {
            state.pending.remove(&hash);
        }
        drop(state);

        trace!(poll_id, outcome = ?outcome, "extpreimage poll exited");
        outcome
    }

    async fn register_poll(&self, payment_hash: Option<PaymentHash>) -> Registration {
        let mut state = self.inner.state.write().await;
        if state.stopped {
            return Registration::Stopped;
        }
        if let Some(existing) = payment_hash.and_then(|hash| state.pending.get(&hash).copied()) {
            return Registration::AlreadyPending(existing);
        }

        let poll_id = state.next_poll_id;
        state.next_poll_id += 1;
        let (quit_tx, quit_rx) = oneshot::channel();
        state.polls.insert(poll_id, quit_tx);
        if let Some(hash) = payment_hash {
            state.pending.insert(hash, poll_id);
        }
        Registration::Registered(poll_id, quit_rx)
    }

    /// One resolution attempt, bounded by the resolve timeout.
    async fn resolve(&self, resolver: &dyn PreimageResolver) -> extpreimage::Result<Preimage> {
        let limit = self.inner.config.resolve_timeout;
        // Without a live HTLC there is no contract context, so the service
        // is asked with a zero time lock and height.
        let attempt = resolver.payment_preimage(
            0,
            0,
            self.inner.client.as_deref(),
            self.inner.registry.as_ref(),
        );
        time::timeout(limit, attempt)
            .await
            .unwrap_or_else(|_| Err(TemporaryError::Timeout(limit).into()))
    }

    async fn run_poll(
        &self,
        poll_id: u64,
        resolver: &dyn PreimageResolver,
        interval: Duration,
        quit: &mut oneshot::Receiver<()>,
    ) -> PollOutcome {
        let payment_hash = resolver
            .payment_hash()
            .map(|hash| hash.to_string())
            .unwrap_or_default();
        let period = interval.max(MIN_POLL_INTERVAL);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut *quit => return PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = &mut *quit => return PollOutcome::Cancelled,
                result = self.resolve(resolver) => result,
            };

            match result {
                Ok(preimage) => {
                    if let Err(err) = self.add_preimage(preimage).await {
                        error!(
                            poll_id,
                            payment_hash = %payment_hash,
                            error = %err,
                            "unable to add polled preimage"
                        );
                    }
                    return PollOutcome::Resolved(preimage);
                }
                Err(RetrievalError::Permanent(err)) => {
                    error!(
                        poll_id,
                        payment_hash = %payment_hash,
                        error = %err,
                        "permanent failure polling extpreimage"
                    );
                    return PollOutcome::PermanentFailure;
                }
                Err(RetrievalError::Temporary(err)) => {
                    error!(
                        poll_id,
                        payment_hash = %payment_hash,
                        error = %err,
                        "temporary failure polling extpreimage"
                    );
                }
            }
        }
    }

    /// Signals every registered poll to exit without waiting for them.
    /// Polls scheduled afterwards exit immediately.
    pub async fn stop(&self) {
        let polls = {
            let mut state = self.inner.state.write().await;
            state.stopped = true;
            state.pending.clear();
            std::mem::take(&mut state.polls)
        };
        for (poll_id, quit) in polls {
            let _ = quit.send(());
            trace!(poll_id, "signalled extpreimage poll to stop");
        }
    }

    /// Like [`PreimageBeacon::stop`], then waits until every poll spawned by
    /// `schedule_poll` has exited.
    pub async fn stop_and_wait(&self) {
        self.stop().await;
        let mut running = self.inner.running_polls.subscribe();
        let _ = running.wait_for(|count| *count == 0).await;
    }

    pub async fn active_polls(&self) -> usize {
        self.inner.state.read().await.polls.len()
    }

    /// Spawned poll tasks still running, including ones already signalled.
    pub fn running_polls(&self) -> usize {
        *self.inner.running_polls.borrow()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.state.read().await.subscribers.len()
    }
}

/// Delivers one preimage to a snapshot of subscribers, a bounded number at
/// a time, so a full subscriber only holds up its own slot.
async fn dispatch(deliveries: Vec<Delivery>, preimage: Preimage, timeout: Duration) {
    let payment_hash = preimage.payment_hash();
    futures::stream::iter(deliveries)
        .for_each_concurrent(DELIVERY_CONCURRENCY, move |delivery| async move {
            let subscriber_id = delivery.subscriber_id();
            match delivery.deliver(preimage, timeout).await {
                DeliveryOutcome::Delivered => {
                    trace!(subscriber_id, payment_hash = %payment_hash, "delivered preimage");
                }
                DeliveryOutcome::Cancelled | DeliveryOutcome::Closed => {
                    debug!(subscriber_id, "subscriber went away before delivery");
                }
                DeliveryOutcome::TimedOut => {
                    warn!(
                        subscriber_id,
                        payment_hash = %payment_hash,
                        "timed out delivering preimage to subscriber"
                    );
                }
            }
        })
        .await;
}

#[async_trait]
impl WitnessBeacon for PreimageBeacon {
    async fn subscribe_updates(&self) -> WitnessSubscription {
        PreimageBeacon::subscribe_updates(self).await
    }

    async fn lookup_preimage(&self, payment_hash: &PaymentHash) -> Option<Preimage> {
        PreimageBeacon::lookup_preimage(self, payment_hash).await
    }

    async fn add_preimage(&self, preimage: Preimage) -> Result<(), WitnessCacheError> {
        PreimageBeacon::add_preimage(self, preimage).await
    }
}
