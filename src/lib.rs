//! Admin Gateway: authenticated request gateway for an admin console backend.
//!
//! Every backend call flows through one [`gateway::Gateway`], which attaches
//! credentials, detects expired identity tokens, refreshes them once for all
//! concurrent callers, replays the failed request once, and forces a clean
//! logout when the session can no longer be trusted.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use admin_gateway::config::load_config;
//! use admin_gateway::gateway::{ApiRequest, Gateway, LogNavigator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(None)?;
//! let gateway = Gateway::from_config(&config, Arc::new(LogNavigator))?;
//! let banners = gateway.send(&ApiRequest::get("/api/admin/banners")).await?;
//! println!("{banners}");
//! # Ok(())
//! # }
//! ```

pub mod build_info;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod session;
#[cfg(test)]
pub mod testsupport;
