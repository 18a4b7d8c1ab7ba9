//! Resolution of command arguments against the session working directory.

/// Maximum length of a resolved path, matching the parameter limit.
pub const FTP_CWD_SIZE: usize = 263;

/// Combines `param` with the current directory into an absolute path.
///
/// An empty argument or `/` resolves to the root; a leading `/` is taken
/// as absolute; anything else is appended to `cwd` with a single `/`
/// separator. A single trailing `/` is stripped unless the result is the
/// root itself. Returns None when the result would overflow the path
/// buffer (the caller replies 500).
///
/// `.` and `..` components are passed through untouched; the volume
/// refuses them, so they surface to the client as a missing path.
pub fn resolve(param: &str, cwd: &str) -> Option<String> {
  let mut path = if param.is_empty() || param == "/" {
    String::from("/")
  } else if param.starts_with('/') {
    String::from(param)
  } else if cwd.ends_with('/') {
    format!("{cwd}{param}")
  } else {
    format!("{cwd}/{param}")
  };

  if path.len() > 1 && path.ends_with('/') {
    path.pop();
  }

  if path.len() >= FTP_CWD_SIZE {
    return None;
  }
  Some(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_empty_and_root() {
    assert_eq!(resolve("", "/subdir").unwrap(), "/");
    assert_eq!(resolve("/", "/subdir").unwrap(), "/");
  }

  #[test]
  fn test_resolve_absolute() {
    assert_eq!(resolve("/a/b", "/ignored").unwrap(), "/a/b");
    assert_eq!(resolve("/a/b/", "/ignored").unwrap(), "/a/b");
  }

  #[test]
  fn test_resolve_relative() {
    assert_eq!(resolve("file.txt", "/").unwrap(), "/file.txt");
    assert_eq!(resolve("file.txt", "/subdir").unwrap(), "/subdir/file.txt");
    assert_eq!(resolve("a/b", "/subdir").unwrap(), "/subdir/a/b");
    assert_eq!(resolve("dir/", "/subdir").unwrap(), "/subdir/dir");
  }

  #[test]
  fn test_resolved_paths_are_normalized() {
    // always absolute, never a trailing slash except the root itself
    for (param, cwd) in [
      ("", "/"),
      ("/", "/deep/dir"),
      ("x", "/"),
      ("x/", "/a"),
      ("/x/y/", "/b"),
    ] {
      let p = resolve(param, cwd).unwrap();
      assert!(p.starts_with('/'));
      assert!(p == "/" || !p.ends_with('/'));
    }
  }

  #[test]
  fn test_resolve_too_long() {
    let long = "a".repeat(FTP_CWD_SIZE);
    assert!(resolve(&long, "/").is_none());

    // exactly at the limit: "/" + 261 bytes = 262 chars, accepted
    let fits = "a".repeat(FTP_CWD_SIZE - 2);
    assert_eq!(resolve(&fits, "/").unwrap().len(), FTP_CWD_SIZE - 1);

    // one more overflows
    let over = "a".repeat(FTP_CWD_SIZE - 1);
    assert!(resolve(&over, "/").is_none());
  }
}
