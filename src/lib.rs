//! Per-guild streaming audio queue for Discord voice channels.
//!
//! [`audio`] holds the playback engine (sessions, pipelines, registry) and knows
//! nothing about Discord; [`bot`] wires it to serenity and songbird.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
