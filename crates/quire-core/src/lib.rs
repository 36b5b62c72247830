pub mod config;
pub mod error;
pub mod target;

pub use config::{LocalConfig, MigrationsConfig, QuireConfig, SharedConfig};
pub use error::{QuireError, Result};
pub use target::TargetKind;
