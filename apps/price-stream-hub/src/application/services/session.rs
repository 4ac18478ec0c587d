//! Client Session
//!
//! One remote connection's view of the hub. A session tracks which symbols
//! it is subscribed to, turns hub callbacks into sink pushes and releases
//! every subscription exactly once when closed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::hub::{HubError, PriceListener, SubscriptionHub, Unsubscribed};
use crate::application::ports::{DeliveryError, EventReporter, FeedEvent, PriceSink};
use crate::domain::streaming::{PriceUpdate, Symbol};
use crate::domain::subscription::ListenerId;

/// Subscriptions of one connected client.
///
/// `close` must be called when the client goes away; it consumes the
/// session so its subscriptions cannot be released twice.
pub struct ClientSession<S> {
    id: Uuid,
    hub: Arc<SubscriptionHub>,
    sink: Arc<S>,
    reporter: Arc<dyn EventReporter>,
    subscriptions: HashMap<Symbol, ListenerId>,
    disconnect: CancellationToken,
}

impl<S> std::fmt::Debug for ClientSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("symbols", &self.subscriptions.keys().collect::<Vec<_>>())
            .field("disconnected", &self.disconnect.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<S: PriceSink + 'static> ClientSession<S> {
    /// Open a session delivering into `sink`.
    #[must_use]
    pub fn new(hub: Arc<SubscriptionHub>, sink: S) -> Self {
        let reporter = hub.reporter();
        Self {
            id: Uuid::new_v4(),
            hub,
            sink: Arc::new(sink),
            reporter,
            subscriptions: HashMap::new(),
            disconnect: CancellationToken::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelled once the sink reports the client gone or too slow.
    #[must_use]
    pub fn disconnected(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    /// Subscribed symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.subscriptions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Subscribe the client to `symbol`. Repeats are a no-op.
    ///
    /// # Errors
    ///
    /// Propagates `HubError` from `SubscriptionHub::subscribe`.
    pub async fn subscribe(&mut self, symbol: &str) -> Result<ListenerId, HubError> {
        let symbol = Symbol::parse(symbol)?;
        if let Some(id) = self.subscriptions.get(&symbol) {
            debug!(session_id = %self.id, symbol = %symbol, "Already subscribed");
            return Ok(*id);
        }

        let id = self.hub.subscribe(symbol.as_str(), self.listener()).await?;
        self.subscriptions.insert(symbol.clone(), id);

        info!(session_id = %self.id, symbol = %symbol, "Client subscribed");
        Ok(id)
    }

    /// Drop the client's subscription to `symbol`.
    pub async fn unsubscribe(&mut self, symbol: &str) -> Unsubscribed {
        let Some(id) = Symbol::parse(symbol)
            .ok()
            .and_then(|s| self.subscriptions.remove(&s))
        else {
            return Unsubscribed::NotRegistered;
        };

        self.hub.unsubscribe(symbol, id).await
    }

    /// Release every subscription.
    pub async fn close(self) {
        let count = self.subscriptions.len();

        futures::future::join_all(
            self.subscriptions
                .iter()
                .map(|(symbol, id)| self.hub.unsubscribe(symbol.as_str(), *id)),
        )
        .await;

        info!(session_id = %self.id, symbols = count, "Client session closed");
    }

    fn listener(&self) -> PriceListener {
        let sink = Arc::clone(&self.sink);
        let reporter = Arc::clone(&self.reporter);
        let disconnect = self.disconnect.clone();
        let session_id = self.id.to_string();

        // A dropped update is never resent (the hub only delivers changes),
        // so a full sink ends the session like a closed one.
        Arc::new(move |update: &PriceUpdate| {
            let result = sink.push(update);
            if let Err(error) = result {
                if error == DeliveryError::Backpressure {
                    reporter.report(FeedEvent::DeliveryDropped {
                        session_id: session_id.clone(),
                        symbol: update.symbol.clone(),
                    });
                }
                disconnect.cancel();
            }
            result
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
