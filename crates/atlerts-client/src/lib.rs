//! # atlerts-client
//!
//! Real-time messaging and unread-state engine. Keeps conversation caches in
//! sync with a live document store, reconciles read state, and maintains
//! unread counts per conversation, per directory row and for the app badge.
//!
//! Hosts build one [`Messenger`] and drive everything through it.

pub mod aggregator;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod message_log;
pub mod read_state;
pub mod session;
pub mod slot;
pub mod state;
pub mod synchronizer;
pub mod unread;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{fmt, EnvFilter};

pub use aggregator::UnreadAggregator;
pub use broadcast::BroadcastFeed;
pub use config::ClientConfig;
pub use directory::Directory;
pub use error::{ClientError, Draft, Result, SendFailure};
pub use events::{EngineEvent, EventBus};
pub use read_state::{MarkReadReport, ReadStateTracker};
pub use session::{LocalSession, SessionProvider};
pub use state::Messenger;
pub use synchronizer::MessageStreamSynchronizer;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Call once, early, from the host.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("atlerts_client=debug,atlerts_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    if installed.is_ok() {
        tracing::info!("Starting {} messaging engine", atlerts_shared::constants::APP_NAME);
    }
}
