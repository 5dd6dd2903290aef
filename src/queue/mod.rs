pub mod job;
pub mod state;

pub use job::Job;
pub use state::WorkQueue;
