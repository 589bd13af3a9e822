pub mod fs_atomic;
pub mod hash;
pub mod ids;
pub mod logging;
pub mod time;
