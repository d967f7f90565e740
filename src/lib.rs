//! # Tunnelscope - Relay tunnels and sole-tenant placement analysis
//!
//! This library provides two independent toolkits that are used together when
//! operating instances behind a WebSocket relay.
//!
//! ## Overview
//!
//! - **Tunnels**: expose a WebSocket relay connection as an ordinary byte
//!   stream and forward local TCP clients through it.
//! - **Placement history**: replay instance audit events backwards to find
//!   out which instance ran on which sole-tenant node, and when.
//!
//! ## Architecture
//!
//! - `net`: stream abstraction, WebSocket adapter, relay listener
//! - `history`: instance and node history reconstruction, reports
//! - `config`: type-safe configuration structures
//! - `config_loader`: configuration file loading
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tunnelscope::{config_loader, history};
//!
//! let config = config_loader::load_config("tunnelscope.yaml".as_ref())?;
//! if let Some(analysis) = &config.analysis {
//!     let events = history::load_events(&analysis.events)?;
//!     let mut builder =
//!         history::InstanceSetHistoryBuilder::new(analysis.window_start, analysis.window_end);
//!     builder.process_all(&events)?;
//!     let report = history::HistoryReport::new(builder.build());
//!     history::generate_text_report(&report, "history.txt".as_ref())?;
//! }
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Library components return `thiserror` enums (`StreamError`,
//! `HistoryError`, ...). File loading and reporting return
//! `color_eyre::Result` with context attached.

pub mod config;
pub mod config_loader;
pub mod net;
pub mod history;
