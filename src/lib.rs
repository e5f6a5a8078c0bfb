pub mod panic_handler;
pub mod settings;
pub mod viewer;

#[cfg(feature = "pdf")]
pub mod pdf;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the host-facing surface of the viewer
pub use viewer::{
    DocumentSource, Navigation, PageTextSequence, PixelSurface, ViewerConfig, ViewerController,
    ViewerEvent, ViewerHandle, ViewerState,
};
