//! Shared helpers for the segmentation path

pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, Letterbox, PADDING_COLOR};
