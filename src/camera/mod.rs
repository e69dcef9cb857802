// Camera domain: discovery, capture sessions, and frame storage.

pub mod backend;
pub mod dummy;
pub mod error;
pub mod frame;
pub mod pool;
pub mod session;
pub mod types;
