//! ComfyUI batch client.
//!
//! Submits workflow variants to a ComfyUI server over its REST API,
//! polls job history concurrently until every job reaches a terminal
//! state, and downloads the resulting artifacts.

pub mod api;
pub mod config;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod poller;
pub mod resolver;
pub mod submitter;

pub use comfybatch_core::image_pack::{PackOptions, PackedImage};
pub use comfybatch_core::seeds::SeedPlan;
pub use comfybatch_core::workflow::WorkflowTemplate;
