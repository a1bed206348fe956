use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Domain events emitted by the checkout core. Consumers run out-of-band;
/// a lost event never fails the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        payment_method: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentVerified {
        order_id: Uuid,
        gateway_payment_ref: String,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    OrdersCancelledForUser {
        user_id: Uuid,
        count: u64,
    },
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Best-effort send; logs and drops on a full or closed channel.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event).await {
            error!("failed to enqueue event: {}", e);
        }
    }
}

pub fn event_channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event queue. Today this only logs; notification fan-out hangs
/// off this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                payment_method,
            } => {
                info!(%order_id, %user_id, %payment_method, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::PaymentVerified {
                order_id,
                gateway_payment_ref,
            } => {
                info!(%order_id, %gateway_payment_ref, "payment verified");
            }
            Event::PaymentFailed { order_id } => {
                info!(%order_id, "payment failed");
            }
            Event::OrdersCancelledForUser { user_id, count } => {
                info!(%user_id, count, "open orders cancelled for user");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order() {
        let (sender, mut rx) = event_channel(8);
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        sender
            .send(Event::OrderCreated {
                order_id,
                user_id,
                payment_method: "COD".into(),
            })
            .await;
        sender.send(Event::PaymentFailed { order_id }).await;

        match rx.recv().await {
            Some(Event::OrderCreated { order_id: id, .. }) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await {
            Some(Event::PaymentFailed { order_id: id }) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_on_closed_channel_does_not_panic() {
        let (sender, rx) = event_channel(1);
        drop(rx);
        sender
            .send(Event::PaymentFailed {
                order_id: Uuid::new_v4(),
            })
            .await;
    }
}
