//! Default values and constants for loader configuration.

/// Default number of conversion workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default memo table capacity, in conversions.
pub const DEFAULT_MEMO_CAPACITY: usize = 64;

/// INI value selecting an unbounded memo table.
pub const UNBOUNDED_CAPACITY: &str = "unbounded";

/// Name of the configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".pixmapload";

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.ini";
