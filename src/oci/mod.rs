mod digest;
mod error;
pub mod manifest;
mod reference;

pub use digest::Digest;
pub use error::Error;
pub use manifest::{ImageConfig, ImageManifest};
pub use reference::Reference;
