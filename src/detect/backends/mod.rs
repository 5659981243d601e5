pub mod fallback;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fallback::FallbackBackend;
pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
