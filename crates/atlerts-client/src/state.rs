//! Composition root.
//!
//! [`Messenger`] wires the engine's components to one store and one session
//! provider and owns their lifecycle. Hosts create it once at startup, call
//! [`start`](Messenger::start), and go through it for every screen.
//!
//! Once started, every screen is closed as soon as the session provider
//! reports a logout or a different user, whether or not the logout went
//! through [`Messenger::logout`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use atlerts_shared::UserIdentity;
use atlerts_store::DocumentStore;

use crate::aggregator::UnreadAggregator;
use crate::broadcast::BroadcastFeed;
use crate::config::ClientConfig;
use crate::directory::Directory;
use crate::error::{ClientError, Result};
use crate::events::EventBus;
use crate::read_state::ReadStateTracker;
use crate::session::SessionProvider;
use crate::synchronizer::MessageStreamSynchronizer;

/// Central engine state.
pub struct Messenger {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn SessionProvider>,
    config: ClientConfig,
    events: EventBus,

    /// Shared so that every chat screen sees what the others already marked.
    tracker: ReadStateTracker,
    directory: Directory,
    aggregator: Arc<UnreadAggregator>,
    screens: Arc<Screens>,
    session_task: Mutex<Option<JoinHandle<()>>>,
}

/// Everything a user has open that must not outlive their session.
struct Screens {
    broadcasts: Arc<BroadcastFeed>,
    /// Chat screens handed out by [`Messenger::chat`]. Weak so that
    /// dropping a screen releases it; logout closes whatever is left.
    chats: Mutex<Vec<Weak<MessageStreamSynchronizer>>>,
}

impl Screens {
    fn close_all(&self) {
        let chats: Vec<Arc<MessageStreamSynchronizer>> = self
            .chats
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for chat in &chats {
            chat.close();
        }
        self.broadcasts.close();
    }

    /// Close the chats that do not belong to `current`, and the feed when
    /// nobody is signed in. Returns the number of chats closed.
    fn release(&self, current: Option<&UserIdentity>) -> usize {
        let stale: Vec<Arc<MessageStreamSynchronizer>> = {
            let mut chats = self.chats.lock();
            let mut stale = Vec::new();
            chats.retain(|weak| match weak.upgrade() {
                Some(chat) if Some(chat.local_user()) == current => true,
                Some(chat) => {
                    stale.push(chat);
                    false
                }
                None => false,
            });
            stale
        };
        for chat in &stale {
            chat.close();
        }
        if current.is_none() {
            self.broadcasts.close();
        }
        stale.len()
    }
}

impl Messenger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn SessionProvider>,
        config: ClientConfig,
    ) -> Self {
        let events = EventBus::new();
        let tracker = ReadStateTracker::new(store.clone());
        let directory = Directory::new(store.clone());
        let aggregator = Arc::new(UnreadAggregator::new(
            store.clone(),
            session.clone(),
            events.clone(),
        ));
        let broadcasts = Arc::new(BroadcastFeed::new(
            store.clone(),
            config.clone(),
            events.clone(),
        ));

        Self {
            store,
            session,
            config,
            events,
            tracker,
            directory,
            aggregator,
            screens: Arc::new(Screens {
                broadcasts,
                chats: Mutex::new(Vec::new()),
            }),
            session_task: Mutex::new(None),
        }
    }

    /// Begin following the session: the global badge binds to whoever signs
    /// in, and open screens close when that user signs out or is replaced.
    pub fn start(&self) {
        self.aggregator.start();

        let mut auth = self.session.auth_state();
        let screens = Arc::downgrade(&self.screens);
        let task = tokio::spawn(async move {
            while auth.changed().await.is_ok() {
                let current = auth.borrow_and_update().clone();
                let Some(screens) = screens.upgrade() else {
                    break;
                };
                let closed = screens.release(current.as_ref());
                if closed > 0 {
                    debug!(closed, "Closed chats of a previous session");
                }
            }
        });
        if let Some(previous) = self.session_task.lock().replace(task) {
            previous.abort();
        }
        info!("Messenger started");
    }

    /// Close everything without signing out.
    pub fn stop(&self) {
        if let Some(task) = self.session_task.lock().take() {
            task.abort();
        }
        self.screens.close_all();
        self.aggregator.stop();
        info!("Messenger stopped");
    }

    pub fn current_user(&self) -> Result<UserIdentity> {
        self.session.current_user().ok_or(ClientError::NotSignedIn)
    }

    /// A new chat screen for the signed-in user. It stops working for them
    /// once they sign out.
    pub fn chat(&self) -> Result<Arc<MessageStreamSynchronizer>> {
        let local = self.current_user()?;
        let chat = Arc::new(
            MessageStreamSynchronizer::new(
                self.store.clone(),
                local,
                self.config.clone(),
                self.tracker.clone(),
                self.events.clone(),
            )
            .with_session(self.session.clone()),
        );

        let mut chats = self.screens.chats.lock();
        chats.retain(|weak| weak.strong_count() > 0);
        chats.push(Arc::downgrade(&chat));
        Ok(chat)
    }

    /// The broadcast feed, opened on first use.
    pub async fn broadcasts(&self) -> Result<Arc<BroadcastFeed>> {
        self.current_user()?;
        let broadcasts = &self.screens.broadcasts;
        if !broadcasts.is_open() {
            broadcasts.open().await?;
        }
        Ok(broadcasts.clone())
    }

    pub fn aggregator(&self) -> &Arc<UnreadAggregator> {
        &self.aggregator
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn read_state(&self) -> &ReadStateTracker {
        &self.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Clear ghost badges for the signed-in user.
    pub async fn repair_unread(&self) -> Result<usize> {
        let local = self.current_user()?;
        self.tracker.repair_unread(&local).await
    }

    /// Close every subscription (chats, broadcast feed, row and global
    /// counts) and reset the badge, then sign out. Everything is closed
    /// before the session provider reports that nobody is signed in.
    pub async fn logout(&self) -> Result<()> {
        let user = self.session.current_user();
        self.screens.close_all();
        self.aggregator.unbind();

        self.session.sign_out().await?;
        if let Some(user) = user {
            info!(user = %user, "Logged out");
        }
        Ok(())
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        if let Some(task) = self.session_task.get_mut().take() {
            task.abort();
        }
        self.aggregator.stop();
    }
}
