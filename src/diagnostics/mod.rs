// Diagnostics: per-session frame and drop statistics.

pub mod stats;
