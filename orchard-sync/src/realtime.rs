//! WebSocket change feed with reconnect backoff.
//!
//! One connection multiplexes every table. Frames are JSON text:
//!
//! - outbound `{"type":"subscribe","table":"orchards","event":"*"}` and
//!   `{"type":"unsubscribe","table":"orchards"}`
//! - inbound `{"type":"change","payload":<ChangeEvent>}`, plus `ack` and
//!   `error` frames which are only logged
//!
//! The server side always subscribes to every kind (`*`); per-subscription
//! filters are applied locally. After a reconnect every table with a live
//! route is subscribed again.

use crate::client::WsClient;
use crate::config::ReconnectConfig;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use orchard_core::{
    new_subscription_id, ChangeEvent, EventFilter, FeedError, OrchardResult, SubscriptionId,
};
use orchard_store::{ChangeFeed, FeedSubscription};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

struct Route {
    table: String,
    filter: EventFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

type Routes = Arc<Mutex<HashMap<SubscriptionId, Route>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Control {
    Subscribe { table: String },
    Unsubscribe { table: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Subscribe { table: &'a str, event: &'a str },
    Unsubscribe { table: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Change { payload: ChangeEvent },
    Ack {
        #[serde(default)]
        table: Option<String>,
    },
    Error { message: String },
}

/// [`ChangeFeed`] over the realtime websocket endpoint.
pub struct WsChangeFeed {
    capacity: usize,
    routes: Routes,
    control: mpsc::UnboundedSender<Control>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl WsChangeFeed {
    /// Spawn the connection manager. Subscription channels hold `capacity`
    /// events each.
    pub fn spawn(ws: WsClient, capacity: usize) -> Self {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (control, control_rx) = mpsc::unbounded_channel();
        let manager = tokio::spawn(run_manager(ws, Arc::clone(&routes), control_rx));
        Self {
            capacity: capacity.max(1),
            routes,
            control,
            manager: Mutex::new(Some(manager)),
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        lock(&self.routes).len()
    }

    /// Stop the connection manager. Open subscription channels close.
    pub fn shutdown(&self) {
        let manager = self
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(manager) = manager {
            manager.abort();
            tracing::info!("Realtime feed stopped");
        }
        lock(&self.routes).clear();
    }

    #[cfg(test)]
    fn detached(capacity: usize) -> (Self, mpsc::UnboundedReceiver<Control>) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let feed = Self {
            capacity,
            routes: Arc::new(Mutex::new(HashMap::new())),
            control,
            manager: Mutex::new(None),
        };
        (feed, control_rx)
    }
}

impl Drop for WsChangeFeed {
    fn drop(&mut self) {
        if let Some(manager) = self
            .manager
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            manager.abort();
        }
    }
}

impl std::fmt::Debug for WsChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChangeFeed")
            .field("capacity", &self.capacity)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn subscribe(
        &self,
        table: &str,
        filter: EventFilter,
    ) -> OrchardResult<FeedSubscription> {
        let (tx, events) = mpsc::channel(self.capacity);
        let handle = new_subscription_id();
        let first_for_table = {
            let mut routes = lock(&self.routes);
            let first = !routes.values().any(|route| route.table == table);
            routes.insert(
                handle,
                Route {
                    table: table.to_string(),
                    filter,
                    tx,
                },
            );
            first
        };

        if first_for_table {
            let control = Control::Subscribe {
                table: table.to_string(),
            };
            if self.control.send(control).is_err() {
                lock(&self.routes).remove(&handle);
                return Err(FeedError::SubscribeFailed {
                    table: table.to_string(),
                    reason: "realtime connection manager stopped".to_string(),
                }
                .into());
            }
        }

        tracing::debug!(subscription = %handle, table, filter = filter.as_str(), "Realtime subscribed");
        Ok(FeedSubscription {
            handle,
            table: table.to_string(),
            events,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionId) -> OrchardResult<()> {
        let (table, last_for_table) = {
            let mut routes = lock(&self.routes);
            let route = routes.remove(&handle).ok_or(FeedError::NotSubscribed)?;
            let last = !routes.values().any(|other| other.table == route.table);
            (route.table, last)
        };
        if last_for_table {
            // A stopped manager has nothing left to unsubscribe from.
            let _ = self.control.send(Control::Unsubscribe {
                table: table.clone(),
            });
        }
        tracing::debug!(subscription = %handle, table = %table, "Realtime unsubscribed");
        Ok(())
    }
}

/// Reconnect delay schedule: jittered, multiplied and capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    current_ms: u64,
    config: ReconnectConfig,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_ms: config.initial_ms,
            config,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = jittered_backoff(self.current_ms, self.config.jitter_ms);
        let next = (self.current_ms as f64 * self.config.multiplier) as u64;
        self.current_ms = next.min(self.config.max_ms);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_ms;
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

async fn run_manager(
    ws: WsClient,
    routes: Routes,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    let mut backoff = Backoff::new(ws.reconnect_config().clone());
    loop {
        match ws.connect().await {
            Ok(stream) => {
                tracing::info!(endpoint = ws.endpoint(), "Realtime connected");
                backoff.reset();
                let (mut sink, mut stream) = stream.split();

                // Anything queued while disconnected is covered by the resubscribe.
                while control_rx.try_recv().is_ok() {}
                let mut alive = true;
                for table in active_tables(&routes) {
                    let frame = subscribe_frame(&table);
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        tracing::warn!(table = %table, error = %err, "Resubscribe failed");
                        alive = false;
                        break;
                    }
                }

                while alive {
                    tokio::select! {
                        message = stream.next() => match message {
                            Some(Ok(Message::Text(text))) => handle_text(&routes, &text),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                tracing::warn!(error = %err, "Realtime stream error");
                                break;
                            }
                        },
                        control = control_rx.recv() => {
                            let Some(control) = control else {
                                tracing::debug!("Realtime feed dropped, manager exiting");
                                return;
                            };
                            if let Err(err) = sink.send(Message::Text(control_frame(&control))).await {
                                tracing::warn!(error = %err, "Realtime control send failed");
                                break;
                            }
                        }
                    }
                }
                tracing::warn!(endpoint = ws.endpoint(), "Realtime disconnected");
            }
            Err(err) => {
                tracing::warn!(endpoint = ws.endpoint(), error = %err, "Realtime connect failed");
            }
        }

        let delay = backoff.next_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Realtime reconnect scheduled");
        tokio::time::sleep(delay).await;
    }
}

/// Distinct tables with at least one route, sorted.
fn active_tables(routes: &Routes) -> Vec<String> {
    let tables: BTreeSet<String> = lock(routes)
        .values()
        .map(|route| route.table.clone())
        .collect();
    tables.into_iter().collect()
}

fn subscribe_frame(table: &str) -> String {
    encode(&Outbound::Subscribe {
        table,
        event: EventFilter::All.as_str(),
    })
}

fn control_frame(control: &Control) -> String {
    match control {
        Control::Subscribe { table } => subscribe_frame(table),
        Control::Unsubscribe { table } => encode(&Outbound::Unsubscribe { table }),
    }
}

fn encode(frame: &Outbound<'_>) -> String {
    // Plain structs of strings always serialize.
    serde_json::to_string(frame).unwrap_or_default()
}

fn handle_text(routes: &Routes, text: &str) {
    match serde_json::from_str::<Inbound>(text) {
        Ok(Inbound::Change { payload }) => {
            route_event(routes, payload);
        }
        Ok(Inbound::Ack { table }) => {
            tracing::debug!(table = table.as_deref().unwrap_or("-"), "Realtime ack");
        }
        Ok(Inbound::Error { message }) => {
            tracing::warn!(message = %message, "Realtime server error");
        }
        Err(err) => {
            let err = FeedError::Decode {
                reason: err.to_string(),
            };
            tracing::warn!(error = %err, "Realtime frame dropped");
        }
    }
}

/// Deliver `event` to every matching route. Returns how many received it.
fn route_event(routes: &Routes, event: ChangeEvent) -> usize {
    let mut delivered = 0;
    let mut closed = Vec::new();
    let mut routes = lock(routes);
    for (handle, route) in routes.iter() {
        if route.table != event.table || !route.filter.matches(event.kind) {
            continue;
        }
        match route.tx.try_send(event.clone()) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    subscription = %handle,
                    table = %route.table,
                    "Realtime channel full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*handle),
        }
    }
    for handle in closed {
        routes.remove(&handle);
    }
    delivered
}

fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<SubscriptionId, Route>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}
