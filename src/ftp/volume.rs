//! FAT-style view over the served directory tree.
//!
//! Sessions address files by absolute virtual paths (the resolver's
//! output). The volume maps them under its root and hands back entries
//! carrying the packed 16-bit date/time words and the directory flag.

use filetime::FileTime;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::ftp::datetime;

#[derive(Debug, Clone)]
pub struct EntryInfo {
  pub name: String,
  /// Long filename; overrides `name` in listings when present.
  pub lfn: Option<String>,
  pub size: u32,
  pub date: u16,
  pub time: u16,
  pub dir: bool,
}

impl EntryInfo {
  pub fn display_name(&self) -> &str {
    self.lfn.as_deref().unwrap_or(&self.name)
  }
}

#[derive(Debug)]
pub struct Volume {
  root: PathBuf,
}

impl Volume {
  pub fn new(root: &str) -> io::Result<Self> {
    Ok(Self {
      root: Path::new(root).canonicalize()?,
    })
  }

  /// Maps a virtual path below the root. `.` and `..` components are
  /// refused so a resolved path can never address anything outside the
  /// served tree.
  fn host_path(&self, vpath: &str) -> io::Result<PathBuf> {
    let relative = vpath.trim_start_matches('/');
    let candidate = Path::new(relative);
    for component in candidate.components() {
      match component {
        Component::Normal(_) => {}
        _ => {
          return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid path component in {vpath}"),
          ))
        }
      }
    }
    Ok(self.root.join(candidate))
  }

  fn entry_from_metadata(name: String, meta: &fs::Metadata) -> EntryInfo {
    let (date, time) = match meta.modified() {
      Ok(mtime) => datetime::pack_system_time(mtime),
      Err(_) => (0, 0),
    };
    EntryInfo {
      name,
      lfn: None,
      size: meta.len().min(u32::MAX as u64) as u32,
      date,
      time,
      dir: meta.is_dir(),
    }
  }

  /// Returns None when the path does not exist; other failures (including
  /// refused path components) surface as errors.
  pub fn stat(&self, vpath: &str) -> io::Result<Option<EntryInfo>> {
    let host = self.host_path(vpath)?;
    let meta = match fs::metadata(&host) {
      Ok(meta) => meta,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e),
    };
    let name = host
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| String::from("/"));
    Ok(Some(Self::entry_from_metadata(name, &meta)))
  }

  pub fn read_dir(&self, vpath: &str) -> io::Result<Vec<EntryInfo>> {
    let host = self.host_path(vpath)?;
    let mut entries = Vec::new();
    for entry in fs::read_dir(host)? {
      let entry = entry?;
      let meta = entry.metadata()?;
      let name = entry.file_name().to_string_lossy().into_owned();
      entries.push(Self::entry_from_metadata(name, &meta));
    }
    Ok(entries)
  }

  pub fn open_read(&self, vpath: &str) -> io::Result<File> {
    File::open(self.host_path(vpath)?)
  }

  /// Create-always semantics: an existing file is truncated.
  pub fn create(&self, vpath: &str) -> io::Result<File> {
    File::create(self.host_path(vpath)?)
  }

  pub fn remove_file(&self, vpath: &str) -> io::Result<()> {
    fs::remove_file(self.host_path(vpath)?)
  }

  pub fn create_dir(&self, vpath: &str) -> io::Result<()> {
    fs::create_dir(self.host_path(vpath)?)
  }

  pub fn remove_dir(&self, vpath: &str) -> io::Result<()> {
    fs::remove_dir(self.host_path(vpath)?)
  }

  pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
    fs::rename(self.host_path(from)?, self.host_path(to)?)
  }

  /// Sets the file mtime from packed date/time words.
  pub fn set_times(&self, vpath: &str, date: u16, time: u16) -> io::Result<()> {
    let secs = datetime::unpack_to_unix(date, time).ok_or_else(|| {
      io::Error::new(io::ErrorKind::InvalidInput, "unrepresentable timestamp")
    })?;
    filetime::set_file_mtime(self.host_path(vpath)?, FileTime::from_unix_time(secs, 0))
  }

  /// Free and total capacity of the filesystem holding the root, in bytes.
  pub fn get_free(&self) -> io::Result<(u64, u64)> {
    let free = fs2::available_space(&self.root)?;
    let total = fs2::total_space(&self.root)?;
    Ok((free, total))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn scratch() -> (tempfile::TempDir, Volume) {
    let dir = tempfile::tempdir().unwrap();
    let vol = Volume::new(dir.path().to_str().unwrap()).unwrap();
    (dir, vol)
  }

  #[test]
  fn test_stat_missing_and_present() {
    let (dir, vol) = scratch();
    assert!(vol.stat("/nothing").unwrap().is_none());

    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    let info = vol.stat("/a.txt").unwrap().unwrap();
    assert_eq!(info.name, "a.txt");
    assert_eq!(info.size, 5);
    assert!(!info.dir);
    assert!(info.date != 0);

    let root = vol.stat("/").unwrap().unwrap();
    assert!(root.dir);
  }

  #[test]
  fn test_dot_components_refused() {
    let (_dir, vol) = scratch();
    assert!(vol.stat("/../etc").is_err());
    assert!(vol.stat("/a/../b").is_err());
    assert!(vol.stat("/.").is_err());
  }

  #[test]
  fn test_read_dir_and_mkdir() {
    let (dir, vol) = scratch();
    vol.create_dir("/sub").unwrap();
    std::fs::write(dir.path().join("f.bin"), b"x").unwrap();

    let mut names: Vec<String> = vol
      .read_dir("/")
      .unwrap()
      .into_iter()
      .map(|e| e.name)
      .collect();
    names.sort();
    assert_eq!(names, ["f.bin", "sub"]);

    assert!(vol.read_dir("/sub").unwrap().is_empty());
    vol.remove_dir("/sub").unwrap();
    assert!(vol.stat("/sub").unwrap().is_none());
  }

  #[test]
  fn test_create_truncates() {
    let (_dir, vol) = scratch();
    vol.create("/f").unwrap().write_all(b"long contents").unwrap();
    vol.create("/f").unwrap().write_all(b"x").unwrap();
    assert_eq!(vol.stat("/f").unwrap().unwrap().size, 1);
  }

  #[test]
  fn test_rename_and_unlink() {
    let (_dir, vol) = scratch();
    vol.create("/a").unwrap();
    vol.rename("/a", "/b").unwrap();
    assert!(vol.stat("/a").unwrap().is_none());
    assert!(vol.stat("/b").unwrap().is_some());
    vol.remove_file("/b").unwrap();
    assert!(vol.stat("/b").unwrap().is_none());
  }

  #[test]
  fn test_set_times_round_trip() {
    let (_dir, vol) = scratch();
    vol.create("/f").unwrap();
    let (date, time) = datetime::parse_timestamp("20200219134528").unwrap();
    vol.set_times("/f", date, time).unwrap();
    let info = vol.stat("/f").unwrap().unwrap();
    assert_eq!(datetime::format_timestamp(info.date, info.time), "20200219134528");
  }

  #[test]
  fn test_get_free() {
    let (_dir, vol) = scratch();
    let (free, total) = vol.get_free().unwrap();
    assert!(total >= free);
    assert!(total > 0);
  }

  #[test]
  fn test_lfn_overrides_short_name() {
    let entry = EntryInfo {
      name: String::from("LONGFI~1.TXT"),
      lfn: Some(String::from("long file name.txt")),
      size: 0,
      date: 0,
      time: 0,
      dir: false,
    };
    assert_eq!(entry.display_name(), "long file name.txt");
  }
}
