//! Infrastructure layer: storage, key management, abuse tracking,
//! admission, logging and background maintenance.

pub mod abuse;
pub mod api_key;
pub mod gate;
pub mod logging;
pub mod maintenance;
pub mod store;
