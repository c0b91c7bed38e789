use std::error::Error;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;

use crate::adjust::{adjust, Adjustment};
use crate::classify::PendingJobs;
use crate::fairshare::{fair_share, NiceLevels, Verdict};
use crate::slurm::{join_ids, ProbeError, Runner, Slurm, SystemRunner, UpdateError, Usage};

/// Bounds of the randomized delay between two cycles, in seconds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    min: u64,
    max: u64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("minimum interval ({min}s) exceeds maximum interval ({max}s)")]
pub struct IntervalError {
    pub min: u64,
    pub max: u64,
}

impl Interval {
    pub fn new(min: u64, max: u64) -> Result<Self, IntervalError> {
        if min <= max {
            Ok(Self { min, max })
        } else {
            Err(IntervalError { min, max })
        }
    }

    /// Draws a delay uniformly from the configured range
    pub fn sample<G: Rng>(&self, rng: &mut G) -> Duration {
        Duration::from_secs(rng.gen_range(self.min..=self.max))
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self { min: 30, max: 90 }
    }
}

/// Where the total number of cores in the partition comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacitySource {
    /// Statically configured; `sinfo` is never queried
    Static(usize),
    /// Queried via `sinfo`, either once or at the start of every cycle
    Query { refresh: bool },
}

/// Settings of a single per-user instance
#[derive(Clone, Debug)]
pub struct Settings {
    pub partition: String,
    pub user: String,
    pub levels: NiceLevels,
    pub capacity: CapacitySource,
    pub interval: Interval,
}

/// Outcome of comparing a user's usage with their fair share
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Nobody has pending jobs, so nothing is adjusted
    NoContention,
    Share {
        fair_share: usize,
        verdict: Verdict,
        nice: u32,
    },
}

/// Everything determined during a successful cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub usage: Usage,
    pub total_cores: usize,
    pub pending_users: usize,
    pub decision: Decision,
    /// Pending jobs of the user; None if no adjustment was needed
    pub pending: Option<PendingJobs>,
    pub adjustment: Option<Adjustment>,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Update(#[from] UpdateError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    Success(Report),
    /// The cycle failed, but may succeed when retried
    TransientFailure(CycleError),
    /// No fair-share decision will ever be possible; the loop must stop
    FatalFailure(CycleError),
}

/// The fair-share control loop for a single user
pub struct App<R = SystemRunner> {
    slurm: Slurm<R>,
    settings: Settings,
    /// Total cores, once successfully queried
    capacity: Option<usize>,
}

impl<R: Runner> App<R> {
    /// Constructs a new instance of [`App`].
    pub fn new(slurm: Slurm<R>, settings: Settings) -> Self {
        let capacity = match settings.capacity {
            CapacitySource::Static(cores) => Some(cores),
            CapacitySource::Query { .. } => None,
        };

        Self {
            slurm,
            settings,
            capacity,
        }
    }

    pub fn slurm(&self) -> &Slurm<R> {
        &self.slurm
    }

    /// Warns if the niceness levels can be overridden by the age of pending jobs
    pub fn check_priority_weights(&self) {
        match self.slurm.priority_weights() {
            Ok(weights) => match weights.age {
                Some(age) => {
                    if let Some(problem) = self.settings.levels.check_age_weight(age) {
                        warn!("{}; adjustments may be overridden by job age", problem);
                    }
                }
                None => debug!("PriorityWeightAge not found in Slurm configuration"),
            },
            Err(err) => warn!("could not read Slurm configuration: {}", error_chain(&err)),
        }
    }

    /// Evaluates usage, and adjusts pending jobs, until a fatal error occurs
    pub fn run(&mut self) -> Result<(), CycleError> {
        let mut rng = rand::thread_rng();

        loop {
            if let CycleOutcome::FatalFailure(err) = self.cycle() {
                return Err(err);
            }

            let delay = self.settings.interval.sample(&mut rng);
            debug!("sleeping for {}s", delay.as_secs());
            thread::sleep(delay);
        }
    }

    /// Runs a single cycle and logs its outcome
    pub fn cycle(&mut self) -> CycleOutcome {
        info!(
            "evaluating usage of {} in partition {}",
            self.settings.user, self.settings.partition
        );

        let outcome = match self.capacity() {
            Ok(total_cores) => match self.evaluate(total_cores) {
                Ok(report) => CycleOutcome::Success(report),
                Err(err) => CycleOutcome::TransientFailure(err),
            },
            // Without a baseline no fair-share comparison is possible
            Err(err) if err.is_malformed() && self.capacity.is_none() => {
                CycleOutcome::FatalFailure(err.into())
            }
            Err(err) => CycleOutcome::TransientFailure(err.into()),
        };

        match &outcome {
            CycleOutcome::Success(_) => {}
            CycleOutcome::TransientFailure(err) => {
                error!("{}; retrying in next cycle", error_chain(err))
            }
            CycleOutcome::FatalFailure(err) => error!("{}", error_chain(err)),
        }

        outcome
    }

    fn capacity(&mut self) -> Result<usize, ProbeError> {
        match (self.settings.capacity, self.capacity) {
            (CapacitySource::Static(cores), _) => Ok(cores),
            (CapacitySource::Query { refresh: false }, Some(cores)) => Ok(cores),
            (CapacitySource::Query { .. }, previous) => {
                let cores = self.slurm.total_cores(&self.settings.partition)?;
                if previous.is_some_and(|v| v != cores) {
                    info!(
                        "capacity of partition {} changed from {} to {} cores",
                        self.settings.partition,
                        previous.unwrap_or_default(),
                        cores
                    );
                }

                self.capacity = Some(cores);
                Ok(cores)
            }
        }
    }

    fn evaluate(&self, total_cores: usize) -> Result<Report, CycleError> {
        let Settings {
            partition, user, ..
        } = &self.settings;

        let usage = self.slurm.usage(partition, user)?;
        info!(
            "{} is running {} tasks using {} cores",
            user, usage.tasks, usage.cores
        );

        let pending_users = self.slurm.pending_users(partition)?;
        info!(
            "partition {} has {} cores; {} users have pending jobs",
            partition, total_cores, pending_users
        );

        let mut report = Report {
            usage,
            total_cores,
            pending_users,
            decision: Decision::NoContention,
            pending: None,
            adjustment: None,
        };

        let Some(share) = fair_share(total_cores, pending_users) else {
            info!("nobody is waiting; no contention, nothing to adjust");
            return Ok(report);
        };

        let verdict = Verdict::classify(usage.cores, share);
        let nice = self.settings.levels.select(verdict);
        info!(
            "fair share is {} cores; {} by {} ({} cores), selecting nice value {}",
            share, verdict, user, usage.cores, nice
        );

        report.decision = Decision::Share {
            fair_share: share,
            verdict,
            nice,
        };

        let pending = PendingJobs::classify(self.slurm.pending_jobs(partition, user)?);
        info!(
            "pending array jobs: [{}]; excluded single-task jobs: [{}]",
            join_ids(&pending.array),
            join_ids(&pending.single)
        );

        let adjustment = adjust(&self.slurm, pending.array.clone(), nice)?;
        match &adjustment {
            Adjustment::StaleJobs { .. } => warn!("{}", adjustment),
            _ => info!("{}", adjustment),
        }

        report.pending = Some(pending);
        report.adjustment = Some(adjustment);
        Ok(report)
    }
}

/// Formats an error together with its sources
pub fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }

    message
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::slurm::testing::{slurm, FakeRunner};
    use crate::slurm::JobId;

    const RUNNING: &str = "JOBID|USER|CPUS\n78_1|alice|100\n78_7|alice|50\n";
    const PENDING: &str = "JOBID|USER|CPUS\n77_[1]|alice|1\n90|bob|1\n91_[3-8]|carol|2\n";
    const MY_PENDING: &str = "JOBID|USER|CPUS\n77_[1]|alice|1\n78_[2]|alice|1\n78_[5]|alice|1\n";
    const EMPTY: &str = "JOBID|USER|CPUS\n";

    fn jobs(values: &[&str]) -> Vec<JobId> {
        values.iter().map(|v| v.parse().unwrap()).collect()
    }

    fn app(runner: FakeRunner, capacity: CapacitySource) -> App<FakeRunner> {
        App::new(
            slurm(runner),
            Settings {
                partition: "infai_1".to_string(),
                user: "alice".to_string(),
                levels: NiceLevels::default(),
                capacity,
                interval: Interval::default(),
            },
        )
    }

    fn query() -> CapacitySource {
        CapacitySource::Query { refresh: false }
    }

    fn report(outcome: CycleOutcome) -> Report {
        match outcome {
            CycleOutcome::Success(report) => report,
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
    }

    #[test]
    fn test_overuse() {
        let runner = FakeRunner::default()
            .reply(0, "150/230/4/384\n")
            .reply(0, RUNNING)
            .reply(0, PENDING)
            .reply(0, MY_PENDING)
            .reply(0, "");
        let mut app = app(runner, query());
        let report = report(app.cycle());

        assert_eq!(report.usage, Usage { tasks: 2, cores: 150 });
        assert_eq!(report.total_cores, 384);
        assert_eq!(report.pending_users, 3);
        assert_eq!(
            report.decision,
            Decision::Share {
                fair_share: 128,
                verdict: Verdict::Overuse,
                nice: 2001
            }
        );
        assert_eq!(
            report.pending,
            Some(PendingJobs {
                array: jobs(&["78_[2]", "78_[5]"]),
                single: jobs(&["77_[1]"]),
            })
        );
        assert_eq!(
            report.adjustment,
            Some(Adjustment::Applied {
                jobs: jobs(&["78_[2]", "78_[5]"]),
                nice: 2001
            })
        );

        let calls = app.slurm().runner().calls.borrow();
        assert_eq!(
            app.slurm().runner().programs(),
            ["sinfo", "squeue", "squeue", "squeue", "scontrol"]
        );
        assert_eq!(calls[4].1, ["update", "jobid=78_[2],78_[5]", "nice=2001"]);
    }

    #[test]
    fn test_fair_use_at_boundary() {
        let runner = FakeRunner::default()
            .reply(0, "JOBID|USER|CPUS\n78_1|alice|128\n")
            .reply(0, PENDING)
            .reply(0, MY_PENDING)
            .reply(0, "");
        let mut app = app(runner, CapacitySource::Static(384));
        let report = report(app.cycle());

        assert!(matches!(
            report.decision,
            Decision::Share {
                fair_share: 128,
                verdict: Verdict::FairUse,
                nice: 1001
            }
        ));
        assert_eq!(
            app.slurm().runner().programs(),
            ["squeue", "squeue", "squeue", "scontrol"]
        );
    }

    #[test]
    fn test_no_contention() {
        let runner = FakeRunner::default()
            .reply(0, RUNNING)
            .reply(0, EMPTY);
        let mut app = app(runner, CapacitySource::Static(384));
        let report = report(app.cycle());

        assert_eq!(report.decision, Decision::NoContention);
        assert_eq!(report.adjustment, None);
        assert!(!app
            .slurm()
            .runner()
            .programs()
            .contains(&"scontrol".to_string()));
    }

    #[test]
    fn test_only_single_task_jobs() {
        let runner = FakeRunner::default()
            .reply(0, EMPTY)
            .reply(0, PENDING)
            .reply(0, "JOBID|USER|CPUS\n77_[1]|alice|1\n79|alice|4\n");
        let mut app = app(runner, CapacitySource::Static(384));
        let report = report(app.cycle());

        assert_eq!(report.adjustment, Some(Adjustment::NoJobs));
        assert_eq!(app.slurm().runner().programs(), ["squeue"; 3]);
    }

    #[test]
    fn test_capacity_is_cached() {
        let runner = FakeRunner::default()
            .reply(0, "0/384/0/384\n")
            .reply(0, EMPTY)
            .reply(0, EMPTY)
            .reply(0, EMPTY)
            .reply(0, EMPTY);
        let mut app = app(runner, query());

        assert_eq!(report(app.cycle()).total_cores, 384);
        assert_eq!(report(app.cycle()).total_cores, 384);
        assert_eq!(
            app.slurm().runner().programs(),
            ["sinfo", "squeue", "squeue", "squeue", "squeue"]
        );
    }

    #[test]
    fn test_capacity_refresh() {
        let runner = FakeRunner::default()
            .reply(0, "0/384/0/384\n")
            .reply(0, EMPTY)
            .reply(0, EMPTY)
            .reply(0, "0/192/0/192\n")
            .reply(0, EMPTY)
            .reply(0, EMPTY);
        let mut app = app(runner, CapacitySource::Query { refresh: true });

        assert_eq!(report(app.cycle()).total_cores, 384);
        assert_eq!(report(app.cycle()).total_cores, 192);
    }

    #[test]
    fn test_malformed_capacity_is_fatal_at_startup() {
        let runner = FakeRunner::default().reply(0, "384 cores\n");
        let mut app = app(runner, query());

        assert!(matches!(
            app.cycle(),
            CycleOutcome::FatalFailure(CycleError::Probe(ProbeError::Capacity { .. }))
        ));
    }

    #[test]
    fn test_malformed_capacity_after_startup() {
        let runner = FakeRunner::default()
            .reply(0, "0/384/0/384\n")
            .reply(0, EMPTY)
            .reply(0, EMPTY)
            .reply(0, "garbage\n");
        let mut app = app(runner, CapacitySource::Query { refresh: true });

        report(app.cycle());
        assert!(matches!(
            app.cycle(),
            CycleOutcome::TransientFailure(CycleError::Probe(ProbeError::Capacity { .. }))
        ));
    }

    #[test]
    fn test_unavailable_capacity_is_transient() {
        let runner = FakeRunner::default()
            .fail()
            .reply(0, "0/384/0/384\n")
            .reply(0, EMPTY)
            .reply(0, EMPTY);
        let mut app = app(runner, query());

        assert!(matches!(
            app.cycle(),
            CycleOutcome::TransientFailure(CycleError::Probe(ProbeError::Spawn { .. }))
        ));
        assert_eq!(report(app.cycle()).total_cores, 384);
    }

    #[test]
    fn test_probe_failure_is_transient() {
        let runner = FakeRunner::default()
            .reply(0, RUNNING)
            .reply(1, "")
            .reply(0, RUNNING)
            .reply(0, EMPTY);
        let mut app = app(runner, CapacitySource::Static(384));

        assert!(matches!(
            app.cycle(),
            CycleOutcome::TransientFailure(CycleError::Probe(ProbeError::Status { .. }))
        ));
        assert_eq!(report(app.cycle()).decision, Decision::NoContention);
    }

    #[test]
    fn test_stale_jobs_are_benign() {
        let runner = FakeRunner::default()
            .reply(0, RUNNING)
            .reply(0, PENDING)
            .reply(0, MY_PENDING)
            .reply(1, "");
        let mut app = app(runner, CapacitySource::Static(384));

        assert!(matches!(
            report(app.cycle()).adjustment,
            Some(Adjustment::StaleJobs { nice: 2001, .. })
        ));
    }

    #[test]
    fn test_update_failure_is_not_fatal() {
        let runner = FakeRunner::default()
            .reply(0, RUNNING)
            .reply(0, PENDING)
            .reply(0, MY_PENDING)
            .reply(2, "");
        let mut app = app(runner, CapacitySource::Static(384));

        assert!(matches!(
            app.cycle(),
            CycleOutcome::TransientFailure(CycleError::Update(UpdateError::Status {
                code: Some(2),
                ..
            }))
        ));
    }

    #[test]
    fn test_interval() {
        let mut rng = StdRng::seed_from_u64(17);

        let interval = Interval::new(30, 90).unwrap();
        for _ in 0..100 {
            let delay = interval.sample(&mut rng).as_secs();
            assert!((30..=90).contains(&delay));
        }

        let interval = Interval::new(60, 60).unwrap();
        assert_eq!(interval.sample(&mut rng), Duration::from_secs(60));

        assert_eq!(
            Interval::new(90, 30),
            Err(IntervalError { min: 90, max: 30 })
        );
    }

    #[test]
    fn test_check_priority_weights() {
        let runner = FakeRunner::default()
            .reply(0, "PriorityWeightAge = 1000\n")
            .fail();
        let app = app(runner, query());

        // Neither outcome is fatal
        app.check_priority_weights();
        app.check_priority_weights();
        assert_eq!(app.slurm().runner().programs(), ["scontrol", "scontrol"]);
    }

    #[test]
    fn test_error_chain() {
        let err = ProbeError::Spawn {
            command: "squeue".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };

        assert_eq!(error_chain(&err), "failed to execute \"squeue\": not found");
    }
}
