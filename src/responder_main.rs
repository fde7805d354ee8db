use std::process::ExitCode;

use leasesim::{logging, Responder, ResponderConfig};
use tracing::{error, info};

const USAGE: &str = "\
Answer every lease request with one fixed reply.

USAGE:
  mock-responder [OPTIONS]

OPTIONS:
      --bind <ADDR>       listen address [default: 127.0.0.1:5000]
      --reply <JSON>      reply sent to every request
                          [default: {\"status\":\"ASSIGNED_IP\",\"assigned_ip\":\"10.0.0.5\",\"lease_time\":10}]
      --silent            never reply
      --log-level <LVL>   trace, debug, info, warn or error [default: info]
      --log-format <FMT>  text or json [default: text]
  -h, --help              print this help
";

fn main() -> ExitCode {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let config = match ResponderConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    logging::init_stdout(config.log_level, config.log_format);

    let responder = match Responder::spawn(config.bind, config.reply) {
        Ok(responder) => responder,
        Err(e) => {
            error!(bind = %config.bind, %e, "failed to start responder");
            return ExitCode::FAILURE;
        }
    };

    wait_for_shutdown();

    info!(requests = responder.requests(), "shutting down");
    responder.shutdown();
    ExitCode::SUCCESS
}

#[cfg(unix)]
fn wait_for_shutdown() {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            if let Some(sig) = signals.forever().next() {
                info!(sig, "received signal");
            }
        }
        Err(e) => {
            error!(%e, "failed to register signal handlers, running until killed");
            loop {
                std::thread::park();
            }
        }
    }
}

#[cfg(not(unix))]
fn wait_for_shutdown() {
    loop {
        std::thread::park();
    }
}
