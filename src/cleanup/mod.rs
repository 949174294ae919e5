pub mod tracker;

pub use tracker::CleanupTracker;
