use clap::{Arg, ArgAction, Command};
use colored::*;
use std::process;
use std::sync::Arc;

use packethunt::{
    config::SimConfig,
    network::tap::{TapDevice, MAX_FRAME_LEN},
    HuntError, Route, Simulator, TokioLauncher,
};

fn print_banner() {
    println!("{}", " ___  ___  ___ _  _____ _____ _  _ _   _ _  _ _____ ".truecolor(46, 204, 113).bold());
    println!("{}", "| _ \\/ _ \\/ __| |/ / __|_   _| || | | | | \\| |_   _|".truecolor(46, 204, 113).bold());
    println!("{}", "|  _/ /_\\ \\ (__| ' <| _|  | | | __ | |_| | .` | | |  ".truecolor(46, 204, 113).bold());
    println!("{}", "|_|/_/   \\_\\___|_|\\_\\___| |_| |_||_|\\___/|_|\\_| |_|  ".truecolor(46, 204, 113).bold());
    println!();
    println!("{}", "A fake LAN full of scripted hosts. Flood it, sniff it, spoof it.".truecolor(255, 215, 0).bold());
    println!("{}", "------------------------------------------------------".bright_blue());
    println!();
}

fn build_cli() -> Command {
    Command::new("packethunt")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulated network for practicing packet-level attacks over a TAP interface")
        .arg(
            Arg::new("interface")
                .short('i')
                .long("interface")
                .value_name("NAME")
                .help("TAP interface to create or attach to (overrides the config)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (default: ~/.packethunt.toml)"),
        )
        .arg(
            Arg::new("owner")
                .long("owner")
                .value_name("UID")
                .help("Hand the TAP device to this uid so it can be used without root")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("no-configure")
                .long("no-configure")
                .help("Attach to the interface without assigning addresses or routes")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration as TOML and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-banner")
                .long("no-banner")
                .help("Skip the startup banner")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity (-v debug, -vv trace)")
                .action(ArgAction::Count),
        )
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<SimConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => SimConfig::from_toml_file(path)?,
        None => SimConfig::load_default_config()?,
    };

    if let Some(name) = matches.get_one::<String>("interface") {
        config.interface.name = name.clone();
    }
    if let Some(uid) = matches.get_one::<u32>("owner") {
        config.interface.owner = Some(*uid);
    }

    config.validate()?;
    Ok(config)
}

/// Read and dispatch frames one at a time until the device fails
fn primary_loop(device: Arc<TapDevice>, simulator: Arc<Simulator>) {
    let mut buf = [0u8; MAX_FRAME_LEN];
    loop {
        let len = match device.read_frame(&mut buf) {
            Ok(0) => continue,
            Ok(len) => len,
            Err(e) if !e.is_fatal() => {
                log::warn!("{}", e);
                continue;
            }
            Err(e) => {
                log::error!("Primary loop stopped: {}", e);
                return;
            }
        };

        let report = simulator.dispatch(&buf[..len]);
        if report.route != Route::Dropped {
            log::trace!("{} byte frame -> {:?}, {} replies", len, report.route, report.written);
        }
    }
}

/// Why the simulator stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Signal,
    ReaderFailed,
}

impl Stop {
    fn exit_code(self) -> i32 {
        match self {
            Stop::Signal => 0,
            Stop::ReaderFailed => 1,
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn fail(err: &anyhow::Error) -> ! {
    eprintln!("{} {}", "[!]".bright_red(), err.to_string().bright_red());
    if let Some(HuntError::PermissionError(_)) = err.downcast_ref::<HuntError>() {
        eprintln!(
            "{}",
            "[~] Creating a TAP device needs root or CAP_NET_ADMIN; use --owner to hand it to your user.".bright_yellow()
        );
    }
    process::exit(1);
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_count("verbose"));

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };

    if matches.get_flag("print-config") {
        match config.to_toml_string() {
            Ok(text) => print!("{}", text),
            Err(e) => fail(&e.into()),
        }
        return;
    }

    if !matches.get_flag("no-banner") {
        print_banner();
    }

    let device = match TapDevice::open(&config.interface.name, config.interface.owner) {
        Ok(device) => Arc::new(device),
        Err(e) => fail(&e.into()),
    };

    let configure = !matches.get_flag("no-configure");
    if configure {
        if let Err(e) = device.configure(&config) {
            fail(&e.into());
        }
    }

    let launcher = Arc::new(TokioLauncher::new(tokio::runtime::Handle::current()));
    let simulator = match Simulator::new(&config, device.clone(), launcher) {
        Ok(simulator) => Arc::new(simulator),
        Err(e) => fail(&e.into()),
    };

    println!(
        "{} {} {} {}",
        "[~]".bright_blue(),
        "Listening on".bright_blue(),
        device.name().bright_cyan().bold(),
        format!("as {}", config.interface.address).bright_blue()
    );

    let reader = tokio::task::spawn_blocking({
        let device = device.clone();
        move || primary_loop(device, simulator)
    });

    let stop = tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown requested");
            Stop::Signal
        }
        _ = reader => {
            log::error!("Primary loop exited, {} is no longer readable", device.name());
            Stop::ReaderFailed
        }
    };

    if configure {
        if let Err(e) = device.teardown() {
            log::warn!("Teardown of {} failed: {}", device.name(), e);
        }
    }
    println!("{} {}", "[~]".bright_blue(), "Bye.".bright_blue());

    // The reader thread is parked in a blocking read; do not wait for it
    process::exit(stop.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_adapter_exits_with_failure() {
        assert_eq!(Stop::Signal.exit_code(), 0);
        assert_eq!(Stop::ReaderFailed.exit_code(), 1);
    }

    #[test]
    fn cli_accepts_owner_and_verbosity() {
        let matches = build_cli()
            .try_get_matches_from(["packethunt", "--owner", "1000", "-vv", "--no-banner"])
            .unwrap();
        assert_eq!(matches.get_one::<u32>("owner"), Some(&1000));
        assert_eq!(matches.get_count("verbose"), 2);
        assert!(matches.get_flag("no-banner"));
    }
}
