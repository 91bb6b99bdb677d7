//! Scripts bundled with the console.

use std::time::Duration;

use anyhow::{bail, Context};
use model::{Command, Location};
use vehicle_api::{ScriptCatalog, ScriptContext};

pub fn catalog() -> ScriptCatalog {
    let mut c = ScriptCatalog::new();
    c.register("monitor", monitor);
    c.register("square", square);
    c.register("mission", mission);
    c
}

/// Log position, mode and EKF health once a second.
fn monitor(ctx: ScriptContext) -> anyhow::Result<()> {
    let v = ctx.vehicle();
    let period = ctx.arguments.first()
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("period must be whole seconds")?
        .unwrap_or(1);
    while ctx.cancel.sleep(Duration::from_secs(period)) {
        let mode = v.snapshot().mode().map(|m| m.name).unwrap_or_else(|| "?".into());
        match v.location() {
            Some(loc) => log::info!("{mode} armed={} ekf={} {loc}", v.armed(), v.ekf_ok()),
            None => log::info!("{mode} armed={} no position yet", v.armed()),
        }
    }
    Ok(())
}

/// Take off and fly a box of `side` meters (default 20) in guided mode.
fn square(ctx: ScriptContext) -> anyhow::Result<()> {
    let side: f64 = match ctx.arguments.first() {
        Some(s) => s.parse().with_context(|| format!("bad side length {s:?}"))?,
        None => 20.0,
    };
    let v = ctx.vehicle();
    v.set_mode("GUIDED")?;
    v.set_armed(true)?;
    if !ctx.cancel.sleep(Duration::from_secs(3)) {
        return Ok(());
    }
    let Some(home) = v.location() else { bail!("no position fix") };
    let alt = 10.0;
    v.commands().takeoff(alt)?;
    if !ctx.cancel.sleep(Duration::from_secs(10)) {
        return Ok(());
    }

    // meters to degrees, small-area approximation
    let dlat = side / 111_320.0;
    let dlon = dlat / home.lat.to_radians().cos().max(0.01);
    let corners = [(dlat, 0.0), (dlat, dlon), (0.0, dlon), (0.0, 0.0)];
    for (i, (n, e)) in corners.iter().enumerate() {
        let target = Location::relative(home.lat + n, home.lon + e, alt);
        log::info!("corner {}: {target}", i + 1);
        v.commands().goto(&target)?;
        if !ctx.cancel.sleep(Duration::from_secs(8)) {
            return Ok(());
        }
    }
    v.set_mode("RTL")?;
    Ok(())
}

/// Replace the vehicle's command sequence with a QGC WPL file, relative to the script directory.
fn mission(ctx: ScriptContext) -> anyhow::Result<()> {
    let Some(file) = ctx.arguments.first() else { bail!("usage: mission <file.waypoints>") };
    let path = ctx.local_path.join(file);
    let items: Vec<Command> = iox::import_waypoints(&path)?;
    let v = ctx.vehicle();
    let cmds = v.commands();
    cmds.clear();
    for item in items {
        cmds.add(item);
    }
    v.flush()?;
    log::info!("uploading {} commands from {}", cmds.count(), path.display());
    Ok(())
}
