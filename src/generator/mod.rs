pub mod compose;
pub mod context;
pub mod outlet;
pub mod research;
pub mod status;
pub mod summary;
pub mod types;
pub mod workflow;
