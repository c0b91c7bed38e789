mod config;
mod jobs;
mod misc;
mod partitions;

use std::io;
use std::process::Command;

pub use config::PriorityWeights;
pub use jobs::{join_ids, ArrayIndex, JobId, QueueEntry, QueueState};
pub use partitions::CPUState;

use misc::count_unique;

/// Exit code of `scontrol update` when some of the listed jobs no longer exist or are
/// no longer pending
pub const STALE_JOBS_EXIT_CODE: i32 = 1;

/// Output of an external command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; None if the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Executes external commands; the seam between this crate and Slurm
pub trait Runner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Runs commands as child processes, blocking until they finish
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Failure to query the state of Slurm
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to execute {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command:?} exited with status {code:?}: {stderr}")]
    Status {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("error while parsing {command:?} output")]
    Parse {
        command: String,
        #[source]
        source: csv::Error,
    },
    #[error("{command:?} returned unexpected string {output:?}")]
    Capacity { command: String, output: String },
}

impl ProbeError {
    /// Returns true if the command ran, but its output could not be understood
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProbeError::Parse { .. } | ProbeError::Capacity { .. })
    }
}

/// Failure to update the niceness of jobs
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("failed to execute {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command:?} exited with status {code:?}: {stderr}")]
    Status {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Result of a successful `scontrol update`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    /// All listed jobs were updated
    Applied,
    /// Some jobs finished or started between listing and updating them
    StaleJobs,
}

/// Snapshot of the resources used by the running jobs of a single user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    /// Number of running tasks; every array task counts separately
    pub tasks: usize,
    /// Sum of CPUs allocated to those tasks
    pub cores: usize,
}

impl Usage {
    pub fn from_entries(entries: &[QueueEntry]) -> Self {
        Usage {
            tasks: entries.len(),
            cores: entries.iter().map(|v| v.cpus).sum(),
        }
    }
}

/// Locations of the Slurm executables
#[derive(Clone, Debug)]
pub struct Executables {
    pub squeue: String,
    pub sinfo: String,
    pub scontrol: String,
}

impl Default for Executables {
    fn default() -> Self {
        Self {
            squeue: "squeue".to_string(),
            sinfo: "sinfo".to_string(),
            scontrol: "scontrol".to_string(),
        }
    }
}

/// Read and write access to Slurm via its command-line tools
pub struct Slurm<R = SystemRunner> {
    runner: R,
    exe: Executables,
}

impl<R: Runner> Slurm<R> {
    pub fn new(runner: R, exe: Executables) -> Self {
        Self { runner, exe }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Cores allocated to running jobs belonging to `user`
    pub fn usage(&self, partition: &str, user: &str) -> Result<Usage, ProbeError> {
        let entries = self.queue(partition, QueueState::Running, Some(user))?;

        Ok(Usage::from_entries(&entries))
    }

    /// Number of distinct users with at least one pending job in `partition`
    pub fn pending_users(&self, partition: &str) -> Result<usize, ProbeError> {
        let entries = self.queue(partition, QueueState::Pending, None)?;

        Ok(count_unique(entries.iter().map(|v| v.user.as_str())))
    }

    /// IDs of pending jobs belonging to `user`; one per array task or range of tasks
    pub fn pending_jobs(&self, partition: &str, user: &str) -> Result<Vec<JobId>, ProbeError> {
        let entries = self.queue(partition, QueueState::Pending, Some(user))?;

        Ok(entries.into_iter().map(|v| v.id).collect())
    }

    /// Total number of CPUs in `partition`
    pub fn total_cores(&self, partition: &str) -> Result<usize, ProbeError> {
        let args = partitions::sinfo_args(partition);
        let output = self.probe(&self.exe.sinfo, &args)?;

        let output = String::from_utf8_lossy(&output.stdout);
        match output.parse::<CPUState>() {
            Ok(state) => Ok(state.total),
            Err(_) => Err(ProbeError::Capacity {
                command: describe(&self.exe.sinfo, &args),
                output: output.into_owned(),
            }),
        }
    }

    /// Priority weights configured in `slurm.conf`
    pub fn priority_weights(&self) -> Result<PriorityWeights, ProbeError> {
        let output = self.probe(&self.exe.scontrol, &PriorityWeights::scontrol_args())?;

        Ok(PriorityWeights::parse(&output.stdout))
    }

    /// Sets the niceness of all `jobs` in a single `scontrol` invocation
    pub fn update_nice(&self, jobs: &[JobId], nice: u32) -> Result<UpdateStatus, UpdateError> {
        let args = update_args(jobs, nice);
        let command = || describe(&self.exe.scontrol, &args);

        let output = self
            .runner
            .run(&self.exe.scontrol, &args)
            .map_err(|source| UpdateError::Spawn {
                command: command(),
                source,
            })?;

        match output.code {
            Some(0) => Ok(UpdateStatus::Applied),
            Some(STALE_JOBS_EXIT_CODE) => Ok(UpdateStatus::StaleJobs),
            code => Err(UpdateError::Status {
                command: command(),
                code,
                stderr: output.stderr_lossy(),
            }),
        }
    }

    fn queue(
        &self,
        partition: &str,
        state: QueueState,
        user: Option<&str>,
    ) -> Result<Vec<QueueEntry>, ProbeError> {
        let args = jobs::squeue_args(partition, state, user);
        let output = self.probe(&self.exe.squeue, &args)?;

        jobs::parse_entries(&describe(&self.exe.squeue, &args), &output.stdout)
    }

    /// Runs a read-only command, failing on unsuccessful exit codes
    fn probe(&self, program: &str, args: &[String]) -> Result<CommandOutput, ProbeError> {
        let output = self
            .runner
            .run(program, args)
            .map_err(|source| ProbeError::Spawn {
                command: describe(program, args),
                source,
            })?;

        if !output.success() {
            return Err(ProbeError::Status {
                command: describe(program, args),
                code: output.code,
                stderr: output.stderr_lossy(),
            });
        }

        Ok(output)
    }
}

fn update_args(jobs: &[JobId], nice: u32) -> Vec<String> {
    vec![
        "update".to_string(),
        format!("jobid={}", join_ids(jobs)),
        format!("nice={}", nice),
    ]
}

/// Renders a command line for log and error messages
fn describe(program: &str, args: &[String]) -> String {
    let mut command = program.to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }

    command
}
