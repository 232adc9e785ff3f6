//! Crash-safe file primitives for everything the agent writes on a node.
//! Nothing is ever published in place: files go to a temp name in the same
//! directory and rename over, directories land via a scratch-name swap.

use crate::util::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MODE_DEFAULT: u32 = 0o644;
pub const MODE_SECRET: u32 = 0o600;
pub const MODE_SCRIPT: u32 = 0o700;

/// Permission bits by content class: scripts keep the owner-executable bit,
/// secret material is owner-only, everything else is world-readable.
pub fn mode_for(name: &str, secret: bool) -> u32 {
    if name.ends_with(".sh") {
        MODE_SCRIPT
    } else if secret {
        MODE_SECRET
    } else {
        MODE_DEFAULT
    }
}

/// One file to materialize: name, payload and content class. The permission
/// bits follow from the two.
#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub data: Vec<u8>,
    pub secret: bool,
}

impl Asset {
    pub fn new(name: &str, data: impl Into<Vec<u8>>, secret: bool) -> Self {
        Asset {
            name: name.to_string(),
            data: data.into(),
            secret,
        }
    }

    pub fn mode(&self) -> u32 {
        mode_for(&self.name, self.secret)
    }

    /// Atomically writes the asset into `dir` and returns the final path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, Error> {
        let path = dir.join(&self.name);
        atomic_write(&path, &self.data, self.mode())?;
        Ok(path)
    }
}

fn file_name_of(path: &Path) -> Result<String, Error> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::UserInput(format!("path {} has no file name", path.display())))
}

fn parent_of(path: &Path) -> Result<&Path, Error> {
    path.parent()
        .ok_or_else(|| Error::UserInput(format!("path {} has no parent", path.display())))
}

fn fsync_dir(dir: &Path) -> Result<(), Error> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn set_mode(file: &File, mode: u32) -> Result<(), Error> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (file, mode);
    Ok(())
}

/// Writes `data` to `path` atomically: temp file in the same directory,
/// permissions and content synced before the rename, parent directory
/// fsynced after.
pub fn atomic_write(path: &Path, data: &[u8], mode: u32) -> Result<(), Error> {
    let parent = parent_of(path)?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".{}.{}.tmp", file_name_of(path)?, std::process::id()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        set_mode(&file, mode)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    fsync_dir(parent)
}

/// Atomically repoints `link` at `target` via a temp symlink and rename.
#[cfg(unix)]
pub fn atomic_symlink(target: &Path, link: &Path) -> Result<(), Error> {
    let parent = parent_of(link)?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".{}.{}.tmp", file_name_of(link)?, std::process::id()));
    let _ = fs::remove_file(&tmp);
    std::os::unix::fs::symlink(target, &tmp)?;
    fs::rename(&tmp, link)?;
    fsync_dir(parent)
}

fn scratch_name(dst: &Path) -> PathBuf {
    dst.with_extension("swap-old")
}

/// Replaces `dst` with the staged directory `src` in three crash-safe
/// steps: `dst` is renamed to a scratch sibling, `src` renames into place,
/// the scratch is removed. A crash between steps leaves one of the two
/// directories reachable; [`recover_dir_swap`] finishes the job.
pub fn swap_dir_into_place(src: &Path, dst: &Path) -> Result<(), Error> {
    let parent = parent_of(dst)?;
    let scratch = scratch_name(dst);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }
    let had_old = dst.exists();
    if had_old {
        fs::rename(dst, &scratch)?;
    }
    fs::rename(src, dst)?;
    if had_old {
        fs::remove_dir_all(&scratch)?;
    }
    fsync_dir(parent)
}

/// Startup recovery for an interrupted [`swap_dir_into_place`]: a scratch
/// directory left next to a complete `dst` is dropped; a scratch without a
/// `dst` becomes `dst` again.
pub fn recover_dir_swap(dst: &Path) -> Result<(), Error> {
    let scratch = scratch_name(dst);
    if !scratch.exists() {
        return Ok(());
    }
    if dst.exists() {
        fs::remove_dir_all(&scratch)?;
    } else {
        fs::rename(&scratch, dst)?;
    }
    fsync_dir(parent_of(dst)?)
}
