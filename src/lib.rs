pub mod assets;
pub mod config;
pub mod core;

pub use crate::assets::request::{PreloadRequest, PropValue, PropertyBag, TargetKind};
pub use crate::assets::{GathererOptions, PreloadedAsset, ResourceGatherer};
pub use crate::core::gfx::TextureUploader;
