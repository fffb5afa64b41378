//! Per-OS stage behavior behind a trait seam.
//!
//! The pipeline shape is fixed; only the parts that genuinely differ per OS
//! live here: how the main executable is named, which bootstrapper template
//! the setup stage embeds into, and the preprocess/code-sign hooks.

use std::path::Path;

use super::super::asset::TargetOs;
use super::super::entries;
use super::super::error::{ErrorExt, Result};

/// OS-specific behavior of the build pipeline.
pub trait PlatformStages: Send + Sync {
    /// The OS this stage set supports.
    fn os(&self) -> TargetOs;

    /// Candidate file names for the main executable, tried in order against
    /// the pack directory.
    fn main_exe_candidates(&self, id: &str, explicit: Option<&str>) -> Vec<String>;

    /// File name of the bootstrapper template the setup stage embeds the
    /// full release into, or `None` when this OS ships no setup artifact.
    fn setup_template(&self) -> Option<&'static str>;

    /// Normalize the staged payload before packing. The default removes any
    /// index files a user accidentally staged (packing a directory that was
    /// itself a release directory would otherwise publish stale feeds inside
    /// the container).
    fn preprocess(&self, staged: &Path, main_exe: &str) -> Result<()> {
        let _ = main_exe;
        strip_index_files(staged)
    }

    /// Code-signing hook. Not invoked for Linux.
    fn code_sign(&self, staged: &Path) -> Result<()> {
        let _ = staged;
        log::debug!(
            "no code signing configured for {}, skipping",
            self.os().short_name()
        );
        Ok(())
    }
}

/// Select the stage set matching a target OS.
pub fn stages_for(os: TargetOs) -> Box<dyn PlatformStages> {
    match os {
        TargetOs::Windows => Box::new(WindowsStages),
        TargetOs::Osx => Box::new(OsxStages),
        TargetOs::Linux => Box::new(LinuxStages),
    }
}

/// Windows stage set.
pub struct WindowsStages;

impl PlatformStages for WindowsStages {
    fn os(&self) -> TargetOs {
        TargetOs::Windows
    }

    fn main_exe_candidates(&self, id: &str, explicit: Option<&str>) -> Vec<String> {
        match explicit {
            Some(exe) if exe.to_ascii_lowercase().ends_with(".exe") => vec![exe.to_string()],
            Some(exe) => vec![exe.to_string(), format!("{exe}.exe")],
            None => vec![format!("{id}.exe")],
        }
    }

    fn setup_template(&self) -> Option<&'static str> {
        Some("setup-template.exe")
    }
}

/// macOS stage set.
pub struct OsxStages;

impl PlatformStages for OsxStages {
    fn os(&self) -> TargetOs {
        TargetOs::Osx
    }

    fn main_exe_candidates(&self, id: &str, explicit: Option<&str>) -> Vec<String> {
        match explicit {
            Some(exe) => vec![exe.to_string()],
            None => vec![id.to_string()],
        }
    }

    fn setup_template(&self) -> Option<&'static str> {
        Some("setup-template")
    }

    fn preprocess(&self, staged: &Path, main_exe: &str) -> Result<()> {
        strip_index_files(staged)?;
        mark_executable(staged, main_exe)
    }
}

/// Linux stage set. Ships full, delta and portable artifacts only.
pub struct LinuxStages;

impl PlatformStages for LinuxStages {
    fn os(&self) -> TargetOs {
        TargetOs::Linux
    }

    fn main_exe_candidates(&self, id: &str, explicit: Option<&str>) -> Vec<String> {
        match explicit {
            Some(exe) => vec![exe.to_string()],
            None => vec![id.to_string()],
        }
    }

    fn setup_template(&self) -> Option<&'static str> {
        None
    }

    fn preprocess(&self, staged: &Path, main_exe: &str) -> Result<()> {
        strip_index_files(staged)?;
        mark_executable(staged, main_exe)
    }
}

fn strip_index_files(staged: &Path) -> Result<()> {
    for entry in std::fs::read_dir(staged).fs_context("listing staged payload", staged)? {
        let entry = entry.fs_context("listing staged payload", staged)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entries::is_index_file(&name) {
            log::warn!("removing stray index file from payload: {name}");
            std::fs::remove_file(entry.path())
                .fs_context("removing stray index file", &entry.path())?;
        }
    }
    Ok(())
}

/// Unix payloads frequently arrive from build systems that drop the exec
/// bit; restore it on the entry point.
fn mark_executable(staged: &Path, main_exe: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let exe = staged.join(main_exe);
        if exe.is_file() {
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755))
                .fs_context("marking main executable", &exe)?;
        }
    }
    #[cfg(not(unix))]
    let _ = (staged, main_exe);
    Ok(())
}
