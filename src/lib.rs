// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! tuberun - Self-hosted video download server library
//!
//! Paste a URL, pick a format, watch it land.
//!
//! tuberun wraps an external download tool (yt-dlp) behind a small HTTP
//! API: inspect the formats available for a URL, stream a download inline,
//! or run it as a background job and follow live progress over SSE.
//!
//! # Core Modules
//!
//! - [`jobs`] - Background job store, notification hub, and orchestrator
//! - [`ytdlp`] - External tool invocation (probe, fetch, stream)
//! - [`server`] - HTTP server and request handlers
//! - [`errors`] - User-facing error taxonomy
//! - [`locks`] - Poisoning-resilient lock helpers
//! - [`utils`] - Filename sanitization and other small helpers

pub mod errors;
pub mod jobs;
pub mod locks;
pub mod server;
pub mod utils;
pub mod ytdlp;

// Re-export commonly used types from the jobs module
pub use jobs::{
    DownloadOrchestrator, Job, JobEvent, JobStatus, JobStore, NotificationHub, SubscriberId,
};

// Re-export the external tool wrapper
pub use ytdlp::{FormatSummary, RawFormat, VideoProbe, YtDlp};

// Re-export from other modules
pub use errors::ApiError;
pub use locks::{resilient_read, resilient_write};
pub use server::Server;
pub use utils::sanitize_title;
