//! Unread counts at directory-row and app-badge scope.
//!
//! The global count follows the session: it is bound to whoever is signed in
//! and reset to zero the moment they sign out. Row counts are opened lazily
//! for visible directory rows. Both are fed by their own subscriptions and
//! never touch a conversation cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use atlerts_shared::{resolve_conversation_id, UserIdentity};
use atlerts_store::DocumentStore;

use crate::error::{ClientError, Result};
use crate::events::{emit_event, EngineEvent, EventBus, UnreadChangedPayload};
use crate::session::SessionProvider;
use crate::slot::SubscriptionSlot;
use crate::unread::{conversation_unread_query, global_query, UnreadSet};

/// Transient bind failures are retried this many times per login.
const BIND_ATTEMPTS: u32 = 5;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(50);

struct RowScope {
    slot: SubscriptionSlot,
    count: Arc<watch::Sender<usize>>,
}

pub struct UnreadAggregator {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn SessionProvider>,
    events: EventBus,
    user: Mutex<Option<UserIdentity>>,
    global: SubscriptionSlot,
    global_count: Arc<watch::Sender<usize>>,
    rows: Mutex<HashMap<UserIdentity, Arc<RowScope>>>,
    session_task: Mutex<Option<JoinHandle<()>>>,
}

impl UnreadAggregator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn SessionProvider>,
        events: EventBus,
    ) -> Self {
        let (global_count, _) = watch::channel(0);
        Self {
            store,
            session,
            events,
            user: Mutex::new(None),
            global: SubscriptionSlot::new("unread:global"),
            global_count: Arc::new(global_count),
            rows: Mutex::new(HashMap::new()),
            session_task: Mutex::new(None),
        }
    }

    /// Follow the session provider: bind on every login, unbind on logout.
    /// A bind that fails transiently is retried with backoff until it
    /// succeeds, the session changes or the attempts run out.
    /// Calling `start` again restarts the follower.
    pub fn start(self: &Arc<Self>) {
        let mut auth = self.session.auth_state();
        let weak = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            'session: loop {
                let current = auth.borrow_and_update().clone();
                match current {
                    Some(user) => {
                        let mut delay = BIND_RETRY_DELAY;
                        for attempt in 1..=BIND_ATTEMPTS {
                            let Some(aggregator) = weak.upgrade() else {
                                break 'session;
                            };
                            let result = aggregator.bind(user.clone()).await;
                            drop(aggregator);

                            let e = match result {
                                Ok(()) => break,
                                Err(e) => e,
                            };
                            if !e.is_retryable() || attempt == BIND_ATTEMPTS {
                                warn!(user = %user, error = %e, "Failed to bind unread counts");
                                break;
                            }
                            warn!(user = %user, attempt, error = %e, "Bind failed, retrying");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                changed = auth.changed() => {
                                    if changed.is_err() {
                                        break 'session;
                                    }
                                    continue 'session;
                                }
                            }
                            delay *= 2;
                        }
                    }
                    None => {
                        let Some(aggregator) = weak.upgrade() else {
                            break;
                        };
                        aggregator.unbind();
                    }
                }

                if auth.changed().await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.session_task.lock().replace(task) {
            previous.abort();
        }
        info!("Unread aggregator started");
    }

    /// Stop following the session and close every subscription.
    pub fn stop(&self) {
        if let Some(task) = self.session_task.lock().take() {
            task.abort();
        }
        self.unbind();
        info!("Unread aggregator stopped");
    }

    /// Bind whoever the session reports as signed in. Lets the host recover
    /// after the follower gave up on a failing store.
    pub async fn rebind(&self) -> Result<()> {
        let user = self.session.current_user().ok_or(ClientError::NotSignedIn)?;
        self.bind(user).await
    }

    /// Open the global subscription for `user`. A no-op when `user` is
    /// already bound with a live subscription. On failure nothing stays
    /// bound.
    pub async fn bind(&self, user: UserIdentity) -> Result<()> {
        {
            let current = self.user.lock().clone();
            if current.as_ref() == Some(&user) && self.global.is_open() {
                return Ok(());
            }
            if current.is_some() {
                self.unbind();
            }
        }
        *self.user.lock() = Some(user.clone());

        let subscription = match self.store.subscribe(global_query(&user)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let mut current = self.user.lock();
                if current.as_ref() == Some(&user) {
                    *current = None;
                }
                return Err(e.into());
            }
        };
        if self.user.lock().as_ref() != Some(&user) {
            debug!(user = %user, "Session changed while binding, dropping subscription");
            return Ok(());
        }

        let mut unread = UnreadSet::new(user.clone());
        let count = self.global_count.clone();
        let events = self.events.clone();
        self.global.install(subscription, move |event| {
            let total = unread.apply(event);
            let changed = count.send_if_modified(|current| {
                let changed = *current != total;
                *current = total;
                changed
            });
            if changed {
                emit_event(
                    &events,
                    EngineEvent::UnreadChanged(UnreadChangedPayload { count: total }),
                );
            }
        });

        info!(user = %user, "Unread counts bound");
        Ok(())
    }

    /// Close the global and every row subscription and reset all counts to
    /// zero. Synchronous: nothing from the previous user is applied after
    /// this returns.
    pub fn unbind(&self) {
        let previous = self.user.lock().take();

        self.global.close();
        let rows: Vec<Arc<RowScope>> = self.rows.lock().drain().map(|(_, row)| row).collect();
        for row in &rows {
            row.slot.close();
            row.count.send_replace(0);
        }

        let was_nonzero = self.global_count.send_replace(0) != 0;
        if was_nonzero {
            emit_event(
                &self.events,
                EngineEvent::UnreadChanged(UnreadChangedPayload { count: 0 }),
            );
        }
        if let Some(user) = previous {
            info!(user = %user, rows = rows.len(), "Unread counts unbound");
        }
    }

    /// Start counting unread messages from `peer` for a directory row.
    /// Re-watching a peer replaces the row's subscription.
    pub async fn watch_peer(&self, peer: &UserIdentity) -> Result<watch::Receiver<usize>> {
        let local = self.user.lock().clone().ok_or(ClientError::NotSignedIn)?;
        let conversation = resolve_conversation_id(&local, Some(peer))?;
        let query = conversation_unread_query(&conversation)?;

        let row = self
            .rows
            .lock()
            .entry(peer.clone())
            .or_insert_with(|| {
                let (count, _) = watch::channel(0);
                Arc::new(RowScope {
                    slot: SubscriptionSlot::new(format!("unread:{peer}")),
                    count: Arc::new(count),
                })
            })
            .clone();
        row.slot.close();

        let subscription = self.store.subscribe(query).await?;

        let still_wanted = self.user.lock().as_ref() == Some(&local)
            && self
                .rows
                .lock()
                .get(peer)
                .map_or(false, |current| Arc::ptr_eq(current, &row));
        if !still_wanted {
            debug!(peer = %peer, "Row went away while subscribing");
            return Ok(row.count.subscribe());
        }

        let mut unread = UnreadSet::from_author(local, peer.clone());
        let count = row.count.clone();
        row.slot.install(subscription, move |event| {
            count.send_replace(unread.apply(event));
        });

        debug!(peer = %peer, "Watching unread row");
        Ok(row.count.subscribe())
    }

    pub fn unwatch_peer(&self, peer: &UserIdentity) {
        let row = self.rows.lock().remove(peer);
        if let Some(row) = row {
            row.slot.close();
            row.count.send_replace(0);
            debug!(peer = %peer, "Stopped watching unread row");
        }
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.user.lock().clone()
    }

    pub fn global_count(&self) -> usize {
        *self.global_count.borrow()
    }

    pub fn watch_global(&self) -> watch::Receiver<usize> {
        self.global_count.subscribe()
    }

    pub fn peer_count(&self, peer: &UserIdentity) -> usize {
        self.rows
            .lock()
            .get(peer)
            .map_or(0, |row| *row.count.borrow())
    }

    /// Peers with an open row, sorted.
    pub fn open_rows(&self) -> Vec<UserIdentity> {
        let mut peers: Vec<UserIdentity> = self.rows.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Sum of all open row counts.
    pub fn rows_total(&self) -> usize {
        self.rows
            .lock()
            .values()
            .map(|row| *row.count.borrow())
            .sum()
    }
}

impl Drop for UnreadAggregator {
    fn drop(&mut self) {
        if let Some(task) = self.session_task.get_mut().take() {
            task.abort();
        }
    }
}
