use std::time::Duration;

use color_eyre::eyre::{bail, eyre, Context};
use color_eyre::Result;
use log::info;

use autonice::app::{App, CapacitySource, CycleOutcome, Interval, Settings};
use autonice::args::{Args, Command, FairShareArgs, WatchArgs};
use autonice::current_user;
use autonice::fairshare::NiceLevels;
use autonice::logging::setup_logging;
use autonice::message::{message_path, Target, Watcher};
use autonice::slurm::{Slurm, SystemRunner};

fn main() -> Result<()> {
    color_eyre::install()?;

    let args: Args = argh::from_env();
    if args.version {
        println!("autonice v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(command) = &args.command else {
        bail!("no command given; run with --help for usage");
    };

    let user = match &args.user {
        Some(user) => user.clone(),
        None => current_user().ok_or_else(|| eyre!("could not determine the current user"))?,
    };

    let _logging = setup_logging(args.verbose, args.log_file.as_deref(), &user)?;
    info!("autonice v{} started", env!("CARGO_PKG_VERSION"));

    let slurm = Slurm::new(SystemRunner, args.executables());
    match command {
        Command::FairShare(cmd) => fairshare(slurm, user, cmd),
        Command::Watch(cmd) => watch(slurm, user, cmd),
    }
}

fn fairshare(slurm: Slurm, user: String, cmd: &FairShareArgs) -> Result<()> {
    let settings = Settings {
        partition: cmd.partition.clone(),
        user,
        levels: NiceLevels::new(cmd.fair_use_nice, cmd.overuse_nice)
            .wrap_err("invalid nice values")?,
        capacity: match cmd.cores {
            Some(cores) => CapacitySource::Static(cores),
            None => CapacitySource::Query {
                refresh: cmd.refresh_cores,
            },
        },
        interval: Interval::new(cmd.min_interval, cmd.max_interval)
            .wrap_err("invalid polling interval")?,
    };

    let mut app = App::new(slurm, settings);
    app.check_priority_weights();

    if cmd.once {
        return match app.cycle() {
            CycleOutcome::Success(_) => Ok(()),
            CycleOutcome::TransientFailure(err) | CycleOutcome::FatalFailure(err) => {
                Err(err).wrap_err("cycle failed")
            }
        };
    }

    app.run()
        .wrap_err("cannot determine the number of cores in the partition")
}

fn watch(slurm: Slurm, user: String, cmd: &WatchArgs) -> Result<()> {
    let path = message_path(&cmd.root, &user);
    let target = cmd.partition.as_ref().map(|partition| Target {
        slurm,
        partition: partition.clone(),
        user,
    });

    Watcher::new(path, Duration::from_secs(cmd.interval), target).run();
    Ok(())
}
