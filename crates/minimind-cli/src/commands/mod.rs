pub mod common;
pub mod queue;
pub mod records;
pub mod status;
pub mod sync;
