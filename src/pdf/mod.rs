//! MuPDF-backed document backend

mod backend;

pub use backend::{MupdfBackend, pixmap_to_rgba};
