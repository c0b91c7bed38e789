use std::fmt;

use crate::slurm::{join_ids, JobId, Runner, Slurm, UpdateError, UpdateStatus};

/// Outcome of applying a niceness value to a set of pending array jobs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Adjustment {
    /// There were no jobs to update, so `scontrol` was not invoked
    NoJobs,
    /// The niceness of all jobs was updated
    Applied { jobs: Vec<JobId>, nice: u32 },
    /// Some jobs left the pending state before they could be updated; the
    /// remaining jobs were updated and the next cycle will re-evaluate them
    StaleJobs { jobs: Vec<JobId>, nice: u32 },
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Adjustment::NoJobs => f.write_str("no pending array jobs, so no nice values to update"),
            Adjustment::Applied { jobs, nice } => {
                write!(f, "set nice value of jobs {} to {}", join_ids(jobs), nice)
            }
            Adjustment::StaleJobs { jobs, nice } => write!(
                f,
                "set nice value of jobs {} to {}; some jobs were no longer pending",
                join_ids(jobs),
                nice
            ),
        }
    }
}

/// Sets the niceness of exactly `jobs` using a single batch update
pub fn adjust<R: Runner>(
    slurm: &Slurm<R>,
    jobs: Vec<JobId>,
    nice: u32,
) -> Result<Adjustment, UpdateError> {
    if jobs.is_empty() {
        return Ok(Adjustment::NoJobs);
    }

    Ok(match slurm.update_nice(&jobs, nice)? {
        UpdateStatus::Applied => Adjustment::Applied { jobs, nice },
        UpdateStatus::StaleJobs => Adjustment::StaleJobs { jobs, nice },
    })
}
