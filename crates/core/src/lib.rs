//! Local building blocks for the ComfyUI batch client: workflow templates,
//! seed planning, and the adaptive image packer.

pub mod error;
pub mod image_pack;
pub mod seeds;
pub mod types;
pub mod workflow;
