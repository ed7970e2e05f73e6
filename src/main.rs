use std::{io, process::ExitCode, thread, time::Duration};

use clap::Parser;
use crossbeam_channel::{after, bounded, select, tick, Receiver};
use sige_slurper::{
    args::{convert_filter, Args},
    errors::{Error, Result},
    launch::{Immediate, LaunchMonitor, SysfsLaunchMonitor},
    recorder::Recorder,
};
use tracing::{error, info};

const LAUNCH_POLL: Duration = Duration::from_millis(10);

enum Outcome {
    Interrupted,
    TimeUp,
    Fault(Error),
}

/// Wait for launch, then record for `duration`. Signals and worker faults cut either phase short.
fn supervise(
    launch: &mut dyn LaunchMonitor,
    faults: &Receiver<Error>,
    interrupt: &Receiver<()>,
    duration: Duration,
) -> Outcome {
    let ticker = tick(LAUNCH_POLL);
    loop {
        // Ok(true) once launched, Err to give up before launch
        let waiting: std::result::Result<bool, Outcome> = select! {
            recv(faults) -> fault => match fault {
                Ok(e) => Err(Outcome::Fault(e)),
                Err(_) => Ok(false),
            },
            recv(interrupt) -> _ => Err(Outcome::Interrupted),
            recv(ticker) -> _ => launch.is_triggered().map_err(|e| {
                error!("Reading launch pins: {e}");
                Outcome::Fault(e.into())
            }),
        };
        match waiting {
            Ok(true) => break,
            Ok(false) => {}
            Err(outcome) => return outcome,
        }
    }
    info!("Detected launch");

    let deadline = after(duration);
    loop {
        let recording: Option<Outcome> = select! {
            recv(faults) -> fault => fault.ok().map(Outcome::Fault),
            recv(interrupt) -> _ => Some(Outcome::Interrupted),
            recv(deadline) -> _ => {
                info!("Time's up! Quitting");
                Some(Outcome::TimeUp)
            }
        };
        if let Some(outcome) = recording {
            return outcome;
        }
    }
}

/// Faults are logged where they happen, only the outcome comes back
fn run(args: &Args) -> Result<Outcome> {
    thread::sleep(Duration::from_secs(args.startup_delay));

    // SIGINT and SIGTERM only ask for a clean stop
    let (interrupt_tx, interrupt) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let mut launch: Box<dyn LaunchMonitor> = if args.no_gpio {
        Box::new(Immediate)
    } else {
        Box::new(SysfsLaunchMonitor::new(&args.gpio_root)?)
    };

    let mut recorder = Recorder::new(args.recorder_config());
    recorder.open()?;
    recorder.start_recording()?;
    launch.set_status(true)?;

    let outcome = supervise(
        launch.as_mut(),
        &recorder.faults(),
        &interrupt,
        Duration::from_secs(args.record_seconds),
    );
    if let Outcome::Interrupted = outcome {
        info!("Stop requested");
    }

    if let Err(e) = launch.set_status(false) {
        error!("Clearing launch status: {e}");
    }
    recorder.close()?;
    Ok(outcome)
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();
    info!(pid = std::process::id(), log_name = %args.logname, "Starting");

    match run(&args) {
        Ok(Outcome::Fault(_)) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
