use std::{process::ExitCode, sync::Arc};

use leasesim::{logging, Config, Orchestrator, SessionOutcome, Summary};
use tracing::info;

const USAGE: &str = "\
Simulate clients of a JSON-over-UDP address leasing service.

USAGE:
  leasesim [OPTIONS]

OPTIONS:
  -n, --clients <N>       number of clients to simulate [default: 6]
      --server <ADDR>     leasing server address [default: 127.0.0.1:5000]
      --timeout <SECS>    receive timeout per client [default: 5]
      --seed <U64>        seed for reproducible client identities
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

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    logging::init_stdout(config.log_level, config.log_format);

    let clients = config.clients;
    let mut orchestrator = Orchestrator::new(Arc::new(config));
    let reports = orchestrator.run_all(clients);

    for report in &reports {
        match &report.outcome {
            SessionOutcome::LeaseGranted {
                address,
                renewal_delay,
            } => info!(client = report.id, %address, ?renewal_delay, "lease granted"),
            SessionOutcome::LeaseDenied => info!(client = report.id, "lease denied"),
            SessionOutcome::ProtocolError(e) => info!(client = report.id, %e, "protocol error"),
            SessionOutcome::Timeout => info!(client = report.id, "timed out"),
        }
    }

    let summary = Summary::from_reports(&reports);
    info!(
        granted = summary.granted,
        denied = summary.denied,
        errored = summary.errored,
        timed_out = summary.timed_out,
        "all sessions finished"
    );

    ExitCode::SUCCESS
}
