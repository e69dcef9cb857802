// Settings: preview configuration and its JSON persistence.

pub mod store;
pub mod types;
