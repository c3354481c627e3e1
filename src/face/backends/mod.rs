pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubLandmarkModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractLandmarkModel;
