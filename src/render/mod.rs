//! Pixel generation and animation encoding.

pub mod generator;
pub mod gif;

pub use generator::{JuliaSetGenerator, PixelGenerator};
pub use gif::{GifSettings, GifWriter};
