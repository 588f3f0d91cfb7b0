//! Configuration sources, settings, and the immutable bootstrap configuration.

pub mod platform;
pub mod properties;
pub mod settings;

pub use platform::PlatformSpec;
pub use properties::{CustomProperties, Properties, CUSTOM_PREFIX};
pub use settings::*;
