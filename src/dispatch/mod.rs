//! Inbound message handling
//!
//! This module handles:
//! - Classifying messages by topic
//! - Reassembling fragmented mesh messages
//! - Applying decoded payloads to the device registry

mod dispatcher;
pub mod handlers;
mod reassembly;

pub use dispatcher::Dispatcher;
pub use reassembly::{FragmentBuffer, FragmentSweeper, Reassembly};
