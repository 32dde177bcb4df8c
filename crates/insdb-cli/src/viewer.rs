use anyhow::{anyhow, Result};
use std::path::Path;
use std::process::Command;

/// Hands a local file to whatever displays it.
pub trait Viewer {
    fn open(&self, path: &Path) -> Result<()>;
}

/// The desktop's default application for the file type.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemViewer;

impl SystemViewer {
    fn command(path: &Path) -> Command {
        if cfg!(target_os = "windows") {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", ""]).arg(path);
            command
        } else if cfg!(target_os = "macos") {
            let mut command = Command::new("open");
            command.arg(path);
            command
        } else {
            let mut command = Command::new("xdg-open");
            command.arg(path);
            command
        }
    }
}

impl Viewer for SystemViewer {
    fn open(&self, path: &Path) -> Result<()> {
        let mut command = Self::command(path);
        tracing::debug!(?command, "launching viewer");
        // The viewer outlives the shell command; only a failure to start is reported.
        command
            .spawn()
            .map_err(|e| anyhow!("failed to open {}: {e}", path.display()))?;
        Ok(())
    }
}
