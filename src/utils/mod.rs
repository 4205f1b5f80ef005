pub mod logger;
pub mod options_toml;
pub mod validate;

pub use logger::{Colors, setup_logging};
pub use validate::*;
