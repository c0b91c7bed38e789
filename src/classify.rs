use crate::slurm::JobId;

/// Pending jobs of a user, split by whether their niceness may be adjusted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingJobs {
    /// Array jobs; subject to fair-share adjustment
    pub array: Vec<JobId>,
    /// Standalone jobs and arrays consisting of a single task; these should always
    /// run as soon as they are eligible
    pub single: Vec<JobId>,
}

impl PendingJobs {
    pub fn classify<I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = JobId>,
    {
        let (single, array): (Vec<_>, Vec<_>) = jobs.into_iter().partition(JobId::is_single_task);

        Self { array, single }
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.single.is_empty()
    }
}
