//! Greensight sync layer
//!
//! Keeps the signed-in user's growing data in memory and in step with the
//! hosted backend:
//! - [`DataCache`]: batches, observations, knowledge base, streak and
//!   achievements, with every write going to the backend first
//! - [`SessionStore`]: who is signed in and which navigation flow applies
//! - [`preferences`]: small local settings kept on the device
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use greensight_gateway::RestGateway;
//! use greensight_sync::{CacheOptions, DataCache, SyncConfig, SystemClock, TracingNotifier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::from_env()?;
//!     let gateway = Arc::new(RestGateway::new(&config.gateway_url, &config.anon_key)?);
//!     let cache = DataCache::new(
//!         gateway,
//!         "user-id",
//!         Arc::new(TracingNotifier),
//!         Arc::new(SystemClock),
//!         CacheOptions::from(&config),
//!     );
//!     cache.load_all().await?;
//!     println!("{} batches", cache.snapshot().batches.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod mapper;
pub mod notify;
pub mod preferences;
pub mod session;
pub mod telemetry;
pub mod upload;

pub use cache::{AchievementStatus, AwardOutcome, CacheOptions, CacheState, DataCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SyncConfig;
pub use error::{CacheError, SessionError};
pub use notify::{CollectingNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use session::{AppLifecycle, AuthFlow, SessionState, SessionStore, SignUpOutcome};
pub use upload::{Bucket, UploadFailure};
