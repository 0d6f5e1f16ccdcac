//! Native backends

#[cfg(feature = "opencv")]
pub mod opencv;

#[cfg(feature = "opencv")]
pub use self::opencv::{OpenCvOpener, YuNetWorker};
