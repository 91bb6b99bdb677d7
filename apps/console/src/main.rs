mod commands;
mod demos;
mod session;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use commands::ConsoleCommand;
use link_replay::{ReplayConfig, ReplaySource};
use session::ConsoleSession;
use vehicle_api::{Connection, VehicleConfig};

const USAGE: &str = "usage: vehicle-console [frames.ndjson] [--speed X] [--loop] [--config file.json]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    frames: Option<PathBuf>,
    config: Option<PathBuf>,
    speed: Option<f64>,
    looped: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut out = Args::default();
    while let Some(a) = args.next() {
        match a.as_str() {
            "--loop" => out.looped = true,
            "--speed" => {
                let v = args.next().context("--speed needs a value")?;
                out.speed = Some(v.parse().with_context(|| format!("bad speed {v:?}"))?);
            }
            "--config" => out.config = Some(args.next().context("--config needs a path")?.into()),
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with('-') => bail!("unknown flag {flag}\n{USAGE}"),
            path if out.frames.is_none() => out.frames = Some(path.into()),
            extra => bail!("unexpected argument {extra}\n{USAGE}"),
        }
    }
    Ok(out)
}

/// Explicit file, else `<config dir>/vehicle-console/config.json` when present, else defaults.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<VehicleConfig> {
    if let Some(p) = explicit {
        return VehicleConfig::load(p);
    }
    if let Some(p) = dirs_next::config_dir().map(|d| d.join("vehicle-console").join("config.json")) {
        if p.exists() {
            log::info!("config from {}", p.display());
            return VehicleConfig::load(&p);
        }
    }
    Ok(VehicleConfig::default())
}

fn repl(session: &ConsoleSession) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut line = String::new();
    loop {
        print!("api> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        match commands::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
            Ok(Some(cmd)) => match session.execute(cmd) {
                Ok(out) if out.is_empty() => {}
                Ok(out) => println!("{out}"),
                Err(e) => println!("error: {e:#}"),
            },
            Err(msg) => println!("{msg}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args(std::env::args().skip(1))?;
    let config = load_config(args.config.as_deref())?;

    let (tx, rx) = link_core::channel();
    let (out_tx, out_rx) = link_core::outbound_channel();
    session::spawn_printer(out_rx)?;
    let conn = Connection::start(config, Arc::new(out_tx), rx)?;

    // keeps the dispatcher alive when there is no source
    let _idle_tx = match args.frames {
        Some(path) => {
            let mut cfg = ReplayConfig { path, looped: args.looped, ..Default::default() };
            if let Some(speed) = args.speed {
                cfg.speed = speed;
            }
            session::run_source(ReplaySource::new(cfg), tx);
            None
        }
        None => {
            log::warn!("no frame log given, vehicle will never report in");
            Some(tx)
        }
    };

    let session = Arc::new(ConsoleSession::new(conn, demos::catalog()));
    let s = session.clone();
    tokio::task::spawn_blocking(move || repl(&s)).await??;

    let stuck = session.close();
    if !stuck.is_empty() {
        log::warn!("scripts still running at exit: {stuck:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> anyhow::Result<Args> {
        parse_args(line.split_whitespace().map(String::from))
    }

    #[test]
    fn parses_flags_in_any_order() {
        let a = args("--speed 4 flight.ndjson --loop").unwrap();
        assert_eq!(a, Args {
            frames: Some("flight.ndjson".into()),
            config: None,
            speed: Some(4.0),
            looped: true,
        });
        assert_eq!(args("").unwrap(), Args::default());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(args("--speed").is_err());
        assert!(args("--speed fast").is_err());
        assert!(args("a.ndjson b.ndjson").is_err());
        assert!(args("--verbose").is_err());
    }

    #[test]
    fn explicit_config_must_exist() {
        assert!(load_config(Some(Path::new("/nonexistent/vehicle.json"))).is_err());
    }
}
