pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubObjectModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractObjectModel;
