//! # Audio Module
//!
//! Per-guild playback engine for the stream-queue bot.
//!
//! ## Architecture
//!
//! ### [`session`] - Session Queue
//! - One task per guild, driven through a [`SessionQueue`] handle
//! - FIFO advance with exactly one advance per finished, failed or skipped track
//! - Connect timeout and reconnect grace handling
//!
//! ### [`pipeline`] - Audio Pipeline
//! - `yt-dlp` resolver chained into an `ffmpeg` transcoder
//! - Startup timeout, stderr diagnostics, kill-and-reap on close
//!
//! ### [`registry`] - Session Registry
//! - Lazily creates one session per guild, safe under concurrent access
//!
//! ### [`transport`] - Voice seams
//! - Traits implemented by the songbird adapter in `bot::voice`
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo (2 channels)
//! - **Encoding**: raw `f32le` PCM, or Ogg/Opus passthrough in direct mode
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_queue::audio::{ProcessPipelineBuilder, SessionConfig, SessionRegistry, TrackDescriptor};
//! use stream_queue::config::Config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let registry = SessionRegistry::new(
//!     SessionConfig::from(&config),
//!     Arc::new(ProcessPipelineBuilder::from_config(&config)),
//! );
//!
//! let session = registry.get(123456789);
//! session.add_track(TrackDescriptor::new("Song", "https://www.youtube.com/watch?v=abc")).await?;
//! # Ok(())
//! # }
//! ```

pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod transport;

pub use notify::{Notice, Notifier};
pub use pipeline::{AudioPipeline, AudioStream, PipelineBuilder, PipelineMode, ProcessPipelineBuilder, StreamFormat};
pub use queue::{MusicQueue, QueueSnapshot};
pub use registry::SessionRegistry;
pub use session::{Enqueued, SessionConfig, SessionKey, SessionQueue, SessionState};
pub use track::TrackDescriptor;
pub use transport::{AudioSink, Connection, ConnectionEvents, TrackEvents, Transport};
