//! Process exit codes.

pub const SUCCESS: u8 = 0;
/// Unclassified failure.
pub const FAILURE: u8 = 1;
/// Bad configuration file or flags.
pub const CONFIG: u8 = 2;
/// Host mount or unmount failure.
pub const MOUNT_FAILED: u8 = 3;
