use std::path::PathBuf;
use tokio::time::{self, Duration, Instant};
use link_core::*;
use iox::LoggedFrame;

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// NDJSON frame log, see `iox::import_frame_log`
    pub path: PathBuf,
    /// Playback rate; 2.0 plays twice as fast, 0 or less sends without pacing.
    pub speed: f64,
    /// Start over when the log ends
    pub looped: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("frames.ndjson"), speed: 1.0, looped: false }
    }
}

/// Plays a recorded frame log into the dispatcher, standing in for a radio link.
pub struct ReplaySource {
    cfg: ReplayConfig,
    frames: Option<Vec<LoggedFrame>>,
}

impl ReplaySource {
    pub fn new(cfg: ReplayConfig) -> Self { Self { cfg, frames: None } }

    /// Replay frames already in memory; `cfg.path` is ignored.
    pub fn with_frames(frames: Vec<LoggedFrame>, cfg: ReplayConfig) -> Self {
        Self { cfg, frames: Some(frames) }
    }

    fn due(&self, start: Instant, t_ms: u64) -> Option<Instant> {
        if self.cfg.speed <= 0.0 { return None; }
        Some(start + Duration::from_secs_f64(t_ms as f64 / 1000.0 / self.cfg.speed))
    }
}

#[async_trait::async_trait]
impl FrameSource for ReplaySource {
    async fn run(&self, tx: FrameTx) -> Result<(), LinkError> {
        let loaded;
        let frames = match &self.frames {
            Some(f) => f,
            None => {
                loaded = iox::import_frame_log(&self.cfg.path)?;
                &loaded
            }
        };
        log::info!("replaying {} frames from {}", frames.len(), self.cfg.path.display());
        if frames.is_empty() { return Ok(()); }

        loop {
            let start = Instant::now();
            for lf in frames {
                if let Some(at) = self.due(start, lf.t_ms) {
                    time::sleep_until(at).await;
                }
                if tx.send(lf.frame.clone()).is_err() {
                    // dispatcher is gone
                    return Ok(());
                }
            }
            if !self.cfg.looped { break; }
            // an unpaced loop would otherwise never give up its worker
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
