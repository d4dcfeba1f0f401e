//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ApplicationConfig (validated, immutable)
//!     → published by a ConfigSource (source.rs)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<ApplicationConfig>
//!     → listeners (the envoy supervisor) are notified
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod source;
pub mod validation;
pub mod watcher;

pub use schema::ApplicationConfig;
pub use schema::EnvoyAdminConfig;
pub use schema::ObservabilityConfig;
pub use schema::TracingConfig;
pub use source::{ChangeListener, ConfigSource, StaticSource};
pub use watcher::FileSource;
