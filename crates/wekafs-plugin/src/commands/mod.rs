pub mod mounts;
pub mod serve;
