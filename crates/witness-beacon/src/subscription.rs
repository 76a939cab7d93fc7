//! Witness update subscriptions.

use std::time::Duration;

use extpreimage::Preimage;
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::beacon::PreimageBeacon;

/// Beacon-side record of a registered subscriber.
pub(crate) struct Subscriber {
    updates: mpsc::Sender<Preimage>,
    cancelled: watch::Sender<bool>,
}

impl Subscriber {
    pub(crate) fn new(buffer: usize) -> (Self, mpsc::Receiver<Preimage>) {
        let (updates, receiver) = mpsc::channel(buffer.max(1));
        let (cancelled, _) = watch::channel(false);
        (Self { updates, cancelled }, receiver)
    }

    /// The caller dropped its handle without cancelling.
    pub(crate) fn is_closed(&self) -> bool {
        self.updates.is_closed()
    }

    pub(crate) fn delivery(&self, subscriber_id: u64) -> Delivery {
        Delivery {
            subscriber_id,
            updates: self.updates.clone(),
            cancelled: self.cancelled.subscribe(),
        }
    }

    pub(crate) fn cancel(self) {
        self.cancelled.send_replace(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Delivered,
    Cancelled,
    Closed,
    TimedOut,
}

/// One pending notification to one subscriber.
pub(crate) struct Delivery {
    subscriber_id: u64,
    updates: mpsc::Sender<Preimage>,
    cancelled: watch::Receiver<bool>,
}

impl Delivery {
    pub(crate) fn subscriber_id(&self) -> u64 {
        self.subscriber_id
    }

    /// Sends `preimage`, racing the subscriber's cancellation and `timeout`.
    pub(crate) async fn deliver(self, preimage: Preimage, timeout: Duration) -> DeliveryOutcome {
        let Self {
            updates,
            mut cancelled,
            ..
        } = self;
        let cancelled = async move {
            // A dropped sender means the subscriber is gone.
            let _ = cancelled.wait_for(|cancelled| *cancelled).await;
        };

        tokio::select! {
            biased;
            () = cancelled => DeliveryOutcome::Cancelled,
            result = updates.send(preimage) => match result {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(_) => DeliveryOutcome::Closed,
            },
            () = time::sleep(timeout) => DeliveryOutcome::TimedOut,
        }
    }
}

/// Caller-side handle returned by `subscribe_updates`.
///
/// Every preimage added to the beacon after the subscription was created is
/// delivered on `updates` at most once. Dropping the handle without calling
/// [`WitnessSubscription::cancel`] leaves the subscriber registered until the
/// next add notices its closed stream.
pub struct WitnessSubscription {
    id: u64,
    pub updates: mpsc::Receiver<Preimage>,
    beacon: PreimageBeacon,
}

impl WitnessSubscription {
    pub(crate) fn new(id: u64, updates: mpsc::Receiver<Preimage>, beacon: PreimageBeacon) -> Self {
        Self {
            id,
            updates,
            beacon,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Preimage> {
        self.updates.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Preimage, mpsc::error::TryRecvError> {
        self.updates.try_recv()
    }

    /// Deregisters the subscriber and unblocks any delivery pending for it.
    pub async fn cancel(self) {
        self.beacon.cancel_subscription(self.id).await;
    }
}
