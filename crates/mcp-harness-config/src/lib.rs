//! Configuration system for the MCP test harness.
//!
//! Provides file-based configuration with:
//! - An ordered list of MCP servers to launch (`[[servers]]`)
//! - Run-wide defaults (call timeout, log level, cleanup behaviour)
//! - TOML or YAML syntax, chosen by file extension
//! - Discovery of `mcp_servers.*` files from the working directory upwards
//!
//! ```toml
//! default_timeout = 30.0
//! log_level = "INFO"
//!
//! [[servers]]
//! name = "filesystem"
//! command = "mcp-server-filesystem"
//! args = ["/tmp/sandbox"]
//! startup_timeout = 10.0
//! ```

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_PATH_ENV, DEFAULT_CONFIG_NAMES, LoadedConfig, find_config_file, load_config,
    load_config_file, merge_config_file,
};
pub use error::{ConfigError, Result};
pub use types::*;
