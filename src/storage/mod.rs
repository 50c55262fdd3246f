pub mod object;
pub mod task;
