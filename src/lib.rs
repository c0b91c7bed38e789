/// Priority adjustment of pending array jobs
pub mod adjust;
/// Fair-share control loop
pub mod app;
/// Command-line arguments
pub mod args;
/// Classification of pending jobs
pub mod classify;
/// Fair-share calculation
pub mod fairshare;
/// Setup of the progress log
pub mod logging;
/// Watcher for manually requested nice values
pub mod message;
/// Querying and updating of Slurm state
pub mod slurm;
mod utilities;

pub use utilities::current_user;
