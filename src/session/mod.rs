//! Session management for browser-driving workers
//!
//! This module contains:
//! - The rendering engine seam (`RenderEngine` / `RenderSession`)
//! - The per-worker `SessionManager` that opens, uses and closes sessions
//! - A bundled HTTP engine for server-rendered pages

mod engine;
mod http;
mod manager;

pub use engine::{NavigationError, RenderEngine, RenderSession};
pub use http::HttpEngine;
pub use manager::{PageFetchResult, Session, SessionError, SessionManager};
