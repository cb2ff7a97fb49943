pub mod cli_config;

pub use cli_config::{apply_overrides, load_config};
