use std::path::PathBuf;

use argh::FromArgs;

use crate::fairshare::{DEFAULT_FAIR_USE_NICE, DEFAULT_OVERUSE_NICE};
use crate::slurm::Executables;

/// Fair-share niceness adjustment for Slurm array jobs
#[derive(FromArgs, Debug)]
pub struct Args {
    /// log debug messages
    #[argh(switch)]
    pub verbose: bool,

    /// append log messages to this file instead of writing them to stderr
    #[argh(option)]
    pub log_file: Option<PathBuf>,

    /// user whose jobs are managed; defaults to the user running autonice
    #[argh(option)]
    pub user: Option<String>,

    /// location of `squeue` executable
    #[argh(option, default = "\"squeue\".to_string()")]
    pub squeue: String,

    /// location of `sinfo` executable
    #[argh(option, default = "\"sinfo\".to_string()")]
    pub sinfo: String,

    /// location of `scontrol` executable
    #[argh(option, default = "\"scontrol\".to_string()")]
    pub scontrol: String,

    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,

    #[argh(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    pub fn executables(&self) -> Executables {
        Executables {
            squeue: self.squeue.clone(),
            sinfo: self.sinfo.clone(),
            scontrol: self.scontrol.clone(),
        }
    }
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Command {
    FairShare(FairShareArgs),
    Watch(WatchArgs),
}

/// Periodically adjust the niceness of pending array jobs according to fair-share usage
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "fairshare")]
pub struct FairShareArgs {
    /// partition in which jobs are monitored
    #[argh(positional)]
    pub partition: String,

    /// total number of cores in the partition; queried via `sinfo` if not given
    #[argh(option)]
    pub cores: Option<usize>,

    /// query the number of cores every cycle instead of once at startup
    #[argh(switch)]
    pub refresh_cores: bool,

    /// nice value for pending array jobs when within the fair share
    #[argh(option, default = "DEFAULT_FAIR_USE_NICE")]
    pub fair_use_nice: u32,

    /// nice value for pending array jobs when exceeding the fair share
    #[argh(option, default = "DEFAULT_OVERUSE_NICE")]
    pub overuse_nice: u32,

    /// minimum number of seconds between cycles
    #[argh(option, default = "30")]
    pub min_interval: u64,

    /// maximum number of seconds between cycles
    #[argh(option, default = "90")]
    pub max_interval: u64,

    /// run a single cycle and exit
    #[argh(switch)]
    pub once: bool,
}

/// Watch a per-user message file for manually requested nice values
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "watch")]
pub struct WatchArgs {
    /// directory containing the `nice` message directory
    #[argh(option, default = "PathBuf::from(\"/tmp/autonice\")")]
    pub root: PathBuf,

    /// polling interval in seconds
    #[argh(option, default = "1")]
    pub interval: u64,

    /// partition in which requested nice values are applied; only logged if not given
    #[argh(option)]
    pub partition: Option<String>,
}
