use anyhow::{bail, Context, Result};
use std::{fs::File, io::{BufRead, BufReader, BufWriter, Write}, path::Path};
use serde::{Serialize, Deserialize};
use link_core::Frame;
use model::*;

const WPL_HEADER: &str = "QGC WPL 110";

/// Load a command list from a QGC WPL 110 waypoint file.
pub fn import_waypoints(path: &Path) -> Result<Vec<Command>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    parse_waypoints(&text).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_waypoints(text: &str) -> Result<Vec<Command>> {
    let mut lines = text.splitn(2, '\n');
    let header = lines.next().unwrap_or("").trim();
    if !header.starts_with("QGC WPL") {
        bail!("not a waypoint file (header {:?})", header);
    }
    let body = lines.next().unwrap_or("");
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let mut cmds = Vec::new();
    for rec in rdr.deserialize() {
        let r: WplRow = rec?;
        let frame = MavFrame::from_id(r.frame)
            .with_context(|| format!("item {}: unknown frame {}", r.seq, r.frame))?;
        cmds.push(Command {
            target_system: 0,
            target_component: 0,
            seq: r.seq,
            frame,
            command: r.command,
            current: r.current,
            autocontinue: r.autocontinue,
            param1: r.param1, param2: r.param2, param3: r.param3, param4: r.param4,
            x: r.x, y: r.y, z: r.z,
        });
    }
    Ok(cmds)
}

/// Write a command list as a QGC WPL 110 file. Items are renumbered from 0.
pub fn export_waypoints(cmds: &[Command], path: &Path) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(f);
    writeln!(out, "{}", WPL_HEADER)?;
    let mut w = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(out);
    for (i, c) in cmds.iter().enumerate() {
        w.serialize(WplRow {
            seq: i as u16,
            current: c.current,
            frame: c.frame.id(),
            command: c.command,
            param1: c.param1, param2: c.param2, param3: c.param3, param4: c.param4,
            x: c.x, y: c.y, z: c.z,
            autocontinue: c.autocontinue,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// One recorded inbound frame, `t_ms` after the start of the recording.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggedFrame {
    pub t_ms: u64,
    pub frame: Frame,
}

pub fn import_frame_log(path: &Path) -> Result<Vec<LoggedFrame>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rdr = BufReader::new(f);
    let mut frames = vec![];
    for (n, line) in rdr.lines().enumerate() {
        let s = line?;
        if s.trim().is_empty() { continue; }
        let l: LoggedFrame = serde_json::from_str(&s)
            .with_context(|| format!("{}:{}", path.display(), n + 1))?;
        frames.push(l);
    }
    Ok(frames)
}

pub fn export_frame_log(frames: &[LoggedFrame], path: &Path) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    for l in frames {
        let s = serde_json::to_string(l)?;
        writeln!(w, "{}", s)?;
    }
    w.flush()?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct WplRow {
    seq: u16, current: u8, frame: u8, command: u16,
    param1: f32, param2: f32, param3: f32, param4: f32,
    x: f64, y: f64, z: f32,
    autocontinue: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_core::{HeartbeatData, VfrHudData};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mission-io-{}-{}", std::process::id(), name))
    }

    #[test]
    fn parses_mission_planner_file() {
        let text = "QGC WPL 110\n\
            0\t1\t0\t16\t0\t0\t0\t0\t-35.363262\t149.165237\t584.09\t1\n\
            1\t0\t3\t22\t0\t0\t0\t0\t0\t0\t20\t1\n\
            2\t0\t3\t16\t0\t0\t0\t0\t-35.36\t149.16\t30\t1\n";
        let cmds = parse_waypoints(text).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].frame, MavFrame::Global);
        assert_eq!(cmds[1].command, cmd::NAV_TAKEOFF);
        assert_eq!(cmds[1].z, 20.0);
        assert_eq!(cmds[2].frame, MavFrame::GlobalRelativeAlt);
        assert_eq!(cmds[2].x, -35.36);
    }

    #[test]
    fn rejects_missing_header() {
        assert!(parse_waypoints("0\t1\t0\t16\t0\t0\t0\t0\t0\t0\t0\t1\n").is_err());
    }

    #[test]
    fn waypoint_file_survives_export() {
        let cmds = vec![
            Command::takeoff(15.0),
            Command::waypoint(&Location::relative(-35.0, 149.0, 40.0)),
        ];
        let path = scratch("mission.txt");
        export_waypoints(&cmds, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(WPL_HEADER));
        let back = import_waypoints(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].seq, 1);
        assert_eq!(back[1].location(), Some(Location::relative(-35.0, 149.0, 40.0)));
    }

    #[test]
    fn frame_log_skips_blank_lines() {
        let frames = vec![
            LoggedFrame { t_ms: 0, frame: Frame::Heartbeat(HeartbeatData::default()) },
            LoggedFrame { t_ms: 250, frame: Frame::VfrHud(VfrHudData { groundspeed: 3.5, ..Default::default() }) },
        ];
        let path = scratch("frames.ndjson");
        export_frame_log(&frames, &path).unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f).unwrap();
        let back = import_frame_log(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, frames);
    }
}
