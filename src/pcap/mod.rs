mod capture;

pub use capture::{CaptureLoader, CaptureSource};
