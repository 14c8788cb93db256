//! Process exit statuses used by the `recipe-sources` binary.
//!
//! - `0`: success
//! - `1`: general error (fetch, update, I/O, network)
//! - `2`: invalid command-line usage (emitted by clap)
//! - `3`: configuration error in the recipe file
//! - `17`: freeze refused because sources carry local modifications

pub const SUCCESS: i32 = 0;
pub const ERROR: i32 = 1;
pub const USAGE: i32 = 2;
pub const CONFIG: i32 = 3;
pub const DIRTY_STATE: i32 = 17;
