use anyhow::{anyhow, bail, Context, Result};
use mcam_autofocus::config::{load_sync_file, TimingConfig};
use mcam_autofocus::focus::{AssistCommand, FocusAssist, McamMotor, StreamFrameSource};
use mcam_autofocus::testing::SimulatedMantis;
use mcam_autofocus::{
    build_scorer, init_logging, AutofocusConfig, CancelToken, ExecutionMode, FocusActuator,
    HostEndpoint, MantisApi, Orchestrator, ThreadSleeper,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "\
Usage: mcam-autofocus-cli <command> [args]

Commands:
  simulate [--cameras N] [--hosts H] [--mode M] [--config FILE] [--json]
  parse-hosts <sync.cfg> [--json]
  print-config [FILE]
  assist [--best STEPS] [--overlay FILE]";

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "simulate" => cmd_simulate(&args[2..]),
        "parse-hosts" => cmd_parse_hosts(&args[2..]),
        "print-config" => cmd_print_config(&args[2..]),
        "assist" => cmd_assist(&args[2..]),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

/// Value following a flag, e.g. `--cameras 4`.
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

fn load_config(path: Option<PathBuf>) -> Result<AutofocusConfig> {
    let path = path.unwrap_or_else(AutofocusConfig::default_path);
    AutofocusConfig::load_from_file(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))
}

fn install_cancel_handler() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("installing Ctrl-C handler")?;
    Ok(token)
}

/// Best-focus position of simulated camera `n`, spread over the travel.
fn simulated_best_position(n: u32, travel: u32) -> u32 {
    let usable = travel.saturating_sub(400).max(1);
    200 + (n.wrapping_mul(617) % usable)
}

fn cmd_simulate(args: &[String]) -> Result<()> {
    // simulate [--cameras N] [--hosts H] [--mode M] [--config FILE] [--json]
    let mut cameras = 2u32;
    let mut hosts = 1u32;
    let mut mode: Option<ExecutionMode> = None;
    let mut config_path = None;
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--cameras" => cameras = flag_value(args, &mut i, "--cameras")?.parse()?,
            "--hosts" => hosts = flag_value(args, &mut i, "--hosts")?.parse()?,
            "--mode" => mode = Some(flag_value(args, &mut i, "--mode")?.parse()?),
            "--config" => config_path = Some(PathBuf::from(flag_value(args, &mut i, "--config")?)),
            "--json" => json = true,
            other => bail!("unexpected argument: {}", other),
        }
        i += 1;
    }
    if hosts == 0 || hosts > 250 {
        bail!("--hosts must be between 1 and 250");
    }

    let mut config = load_config(config_path)?;
    if let Some(mode) = mode {
        config.orchestrator.mode = mode;
    }
    // Simulated motors settle instantly.
    config.timing = TimingConfig::immediate();

    let travel = config.search.total_range;
    let mut builder = SimulatedMantis::builder().travel(travel);
    let mut endpoints = Vec::new();
    for h in 1..=hosts {
        let host = format!("10.0.0.{}", h);
        let mcams: Vec<(u32, u32)> = (1..=cameras)
            .map(|c| {
                let id = (h - 1) * cameras + c;
                (id, simulated_best_position(id, travel))
            })
            .collect();
        builder = builder.host(&host, &mcams);
        endpoints.push(HostEndpoint::new(host, config.orchestrator.control_port));
    }
    let sim = Arc::new(builder.build());

    let cancel = install_cancel_handler()?;
    let orchestrator = Orchestrator::new(sim, config)?.with_cancel_token(cancel);
    let report = orchestrator.run_autofocus(&endpoints);

    if json {
        println!("{}", report.to_json_pretty()?);
    } else {
        println!("Run {} ({:?}, {} ms)", report.run_id, report.mode, report.duration_ms());
        for host in &report.hosts {
            if let Some(err) = &host.connection_error {
                println!("  {}: unreachable ({})", host.host, err);
                continue;
            }
            for r in &host.results {
                let outcome = match r.failure_reason {
                    Some(reason) => format!("failed: {}", reason),
                    None if r.converged => "converged".to_string(),
                    None => "not converged".to_string(),
                };
                println!(
                    "  {} mcam {}: position {} metric {:.3} {}",
                    host.host.host, r.camera_id, r.final_position, r.final_metric, outcome
                );
            }
        }
        println!(
            "{}/{} cameras converged",
            report.converged_count(),
            report.camera_count()
        );
    }
    Ok(())
}

fn cmd_parse_hosts(args: &[String]) -> Result<()> {
    let path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow!("Usage: mcam-autofocus-cli parse-hosts <sync.cfg> [--json]"))?;
    let hosts = load_sync_file(path)?;
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string(&hosts)?);
    } else {
        for host in hosts {
            println!("{}", host);
        }
    }
    Ok(())
}

fn cmd_print_config(args: &[String]) -> Result<()> {
    let config = load_config(args.first().map(PathBuf::from))?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_assist(args: &[String]) -> Result<()> {
    // assist [--best STEPS] [--overlay FILE]
    let mut best = 1200u32;
    let mut overlay_path: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--best" => best = flag_value(args, &mut i, "--best")?.parse()?,
            "--overlay" => overlay_path = Some(PathBuf::from(flag_value(args, &mut i, "--overlay")?)),
            other => bail!("unexpected argument: {}", other),
        }
        i += 1;
    }

    let config = load_config(None)?;
    let sim = SimulatedMantis::builder().host("10.0.0.1", &[(1, best)]).build();
    let conn = sim.connect(&HostEndpoint::new("10.0.0.1", config.orchestrator.control_port))?;
    let camera = sim
        .list_microcameras(&conn)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("simulator has no microcamera"))?;
    let port = config.orchestrator.stream_port_base;
    if !sim.start_stream(&camera, port) {
        bail!("could not start stream for {}", camera);
    }

    let cancel = install_cancel_handler()?;
    let sleeper = ThreadSleeper;
    let scorer = build_scorer(&config.scorer);
    let mut actuator = FocusActuator::new(McamMotor::new(&sim, &camera), config.timing.move_settle(), &sleeper, &cancel);
    actuator.home()?;
    let frames = StreamFrameSource::new(&sim, port, config.timing.grab_timeout(), scorer.as_ref());
    let mut assist = FocusAssist::new(actuator, frames);

    println!("Commands: i (in/far), o (out/near), s <n> (step size), q (quit)");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        match assist.sample() {
            Ok(sample) => {
                println!(
                    "position {:>5}  step {:>4}  metric {:.4}",
                    sample.position,
                    assist.step_size(),
                    sample.metric
                );
                if let Some(path) = &overlay_path {
                    sample
                        .overlay
                        .save(path)
                        .with_context(|| format!("saving overlay to {}", path.display()))?;
                }
            }
            Err(e) => println!("no frame: {}", e),
        }

        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<AssistCommand>() {
            Ok(command) => {
                if !assist.apply(command)? {
                    break;
                }
            }
            Err(e) => println!("{}", e),
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    sim.stop_stream(&camera, port);
    sim.disconnect(&conn)?;
    Ok(())
}
