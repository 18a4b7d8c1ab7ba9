//! Parsing of received control-connection buffers into command word and
//! parameter string.

/// Commands are at most 4 letters.
pub const FTP_CMD_LEN: usize = 4;

/// Parameter buffer size; the longest accepted parameter is one byte less.
pub const FTP_PARAM_SIZE: usize = 263;

/// Size of the receive buffer for one command line.
pub const NET_BUF_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
  Ok,
  /// A parameter was started but no `\r` or `\n` terminates it.
  SyntaxError,
  /// The parameter does not fit the parameter buffer.
  TooLong,
}

/// Splits one received buffer into `command` and `parameters`.
///
/// The command word is up to four alphabetic bytes, case preserved as
/// sent. A single space ends the word and starts the parameter; further
/// spaces are skipped, then bytes are collected until `\r` or `\n`.
/// Without a space the parameter is empty and parsing ends.
pub fn parse_line(buf: &[u8], command: &mut String, parameters: &mut String) -> Parse {
  command.clear();
  parameters.clear();

  let mut i = 0;
  while i < buf.len() && buf[i].is_ascii_alphabetic() && command.len() < FTP_CMD_LEN {
    command.push(buf[i] as char);
    i += 1;
  }

  if i >= buf.len() || buf[i] != b' ' {
    return Parse::Ok;
  }
  while i < buf.len() && buf[i] == b' ' {
    i += 1;
  }

  let start = i;
  while i < buf.len() && buf[i] != b'\r' && buf[i] != b'\n' {
    i += 1;
  }
  if i >= buf.len() {
    return Parse::SyntaxError;
  }
  if i - start >= FTP_PARAM_SIZE {
    return Parse::TooLong;
  }
  parameters.push_str(&String::from_utf8_lossy(&buf[start..i]));
  Parse::Ok
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(buf: &[u8]) -> (String, String, Parse) {
    let mut cmd = String::new();
    let mut params = String::new();
    let outcome = parse_line(buf, &mut cmd, &mut params);
    (cmd, params, outcome)
  }

  #[test]
  fn test_bare_command() {
    let (cmd, params, out) = parse(b"PWD\r\n");
    assert_eq!(out, Parse::Ok);
    assert_eq!(cmd, "PWD");
    assert_eq!(params, "");
  }

  #[test]
  fn test_command_with_parameter() {
    let (cmd, params, out) = parse(b"CWD /subdir\r\n");
    assert_eq!(out, Parse::Ok);
    assert_eq!(cmd, "CWD");
    assert_eq!(params, "/subdir");
  }

  #[test]
  fn test_extra_spaces_skipped() {
    let (cmd, params, out) = parse(b"STOR   hello.bin\r\n");
    assert_eq!(out, Parse::Ok);
    assert_eq!(cmd, "STOR");
    assert_eq!(params, "hello.bin");
  }

  #[test]
  fn test_case_preserved() {
    let (cmd, _, out) = parse(b"pasv\r\n");
    assert_eq!(out, Parse::Ok);
    assert_eq!(cmd, "pasv");
  }

  #[test]
  fn test_word_truncated_at_four_letters() {
    // a fifth letter is not a space, so the parameter stays empty
    let (cmd, params, out) = parse(b"ABORT\r\n");
    assert_eq!(out, Parse::Ok);
    assert_eq!(cmd, "ABOR");
    assert_eq!(params, "");
  }

  #[test]
  fn test_parameter_without_terminator() {
    let (_, _, out) = parse(b"CWD /subdir");
    assert_eq!(out, Parse::SyntaxError);
  }

  #[test]
  fn test_parameter_length_boundary() {
    let fits = format!("DELE {}\r\n", "a".repeat(FTP_PARAM_SIZE - 1));
    let (_, params, out) = parse(fits.as_bytes());
    assert_eq!(out, Parse::Ok);
    assert_eq!(params.len(), FTP_PARAM_SIZE - 1);

    let over = format!("DELE {}\r\n", "a".repeat(FTP_PARAM_SIZE));
    let (_, _, out) = parse(over.as_bytes());
    assert_eq!(out, Parse::TooLong);
  }

  #[test]
  fn test_blank_line_is_empty_command() {
    let (cmd, params, out) = parse(b"\r\n");
    assert_eq!(out, Parse::Ok);
    assert_eq!(cmd, "");
    assert_eq!(params, "");
  }
}
