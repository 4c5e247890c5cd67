pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubBackend, FRUIT_CLASSES};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
