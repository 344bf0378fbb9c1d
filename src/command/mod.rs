//! Outbound commands
//!
//! This module handles:
//! - Validating and optionally sealing operator commands
//! - Choosing direct or mesh relay delivery
//! - Building OTA update commands

mod encoder;
pub mod mesh;
pub mod ota;

pub use encoder::CommandSender;
pub use mesh::{build_envelope, MeshInfo};
pub use ota::{Board, OtaBuilder, UpdateCommand};
