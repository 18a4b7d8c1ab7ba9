//! Command dispatch and per-command semantics.

use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::ftp::commands::NET_BUF_SIZE;
use crate::ftp::datetime;
use crate::ftp::paths;
use crate::ftp::session::{DataMode, Session};
use crate::ftp::volume::EntryInfo;
use crate::ftp::{FTP_BUF_SIZE, FTP_TIME_OUT};

/// Whether the command loop keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Quit,
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
  List,
  Nlst,
  Mlsd,
}

#[async_trait]
pub trait FtpCommands {
  async fn dispatch(&mut self) -> io::Result<Flow>;

  async fn cmd_pwd(&mut self) -> io::Result<()>;
  async fn cmd_cwd(&mut self) -> io::Result<()>;
  async fn cmd_mode(&mut self) -> io::Result<()>;
  async fn cmd_stru(&mut self) -> io::Result<()>;
  async fn cmd_type(&mut self) -> io::Result<()>;
  async fn cmd_pasv(&mut self) -> io::Result<()>;
  async fn cmd_port(&mut self) -> io::Result<()>;
  async fn cmd_list(&mut self) -> io::Result<()>;
  async fn cmd_nlst(&mut self) -> io::Result<()>;
  async fn cmd_mlsd(&mut self) -> io::Result<()>;
  async fn cmd_dele(&mut self) -> io::Result<()>;
  async fn cmd_noop(&mut self) -> io::Result<()>;
  async fn cmd_retr(&mut self) -> io::Result<()>;
  async fn cmd_stor(&mut self) -> io::Result<()>;
  async fn cmd_mkd(&mut self) -> io::Result<()>;
  async fn cmd_rmd(&mut self) -> io::Result<()>;
  async fn cmd_rnfr(&mut self) -> io::Result<()>;
  async fn cmd_rnto(&mut self) -> io::Result<()>;
  async fn cmd_feat(&mut self) -> io::Result<()>;
  async fn cmd_mdtm(&mut self) -> io::Result<()>;
  async fn cmd_size(&mut self) -> io::Result<()>;
  async fn cmd_site(&mut self) -> io::Result<()>;
  async fn cmd_stat(&mut self) -> io::Result<()>;
}

#[async_trait]
impl FtpCommands for Session {
  /// Case-sensitive match on the command word as received; the reader
  /// preserves casing, so only uppercase words reach their handler.
  async fn dispatch(&mut self) -> io::Result<Flow> {
    match self.command.as_str() {
      "QUIT" => return Ok(Flow::Quit),
      "PWD" => self.cmd_pwd().await?,
      "CWD" => self.cmd_cwd().await?,
      // CDUP does not pop a path component, it behaves exactly like CWD
      "CDUP" => self.cmd_cwd().await?,
      "MODE" => self.cmd_mode().await?,
      "STRU" => self.cmd_stru().await?,
      "TYPE" => self.cmd_type().await?,
      "PASV" => self.cmd_pasv().await?,
      "PORT" => self.cmd_port().await?,
      "LIST" => self.cmd_list().await?,
      "NLST" => self.cmd_nlst().await?,
      "MLSD" => self.cmd_mlsd().await?,
      "DELE" => self.cmd_dele().await?,
      "NOOP" => self.cmd_noop().await?,
      "RETR" => self.cmd_retr().await?,
      "STOR" => self.cmd_stor().await?,
      "MKD" => self.cmd_mkd().await?,
      "RMD" => self.cmd_rmd().await?,
      "RNFR" => self.cmd_rnfr().await?,
      "RNTO" => self.cmd_rnto().await?,
      "FEAT" => self.cmd_feat().await?,
      "MDTM" => self.cmd_mdtm().await?,
      "SIZE" => self.cmd_size().await?,
      "SITE" => self.cmd_site().await?,
      "STAT" => self.cmd_stat().await?,
      _ => self.send("500 Unknown command").await?,
    }
    Ok(Flow::Continue)
  }

  async fn cmd_pwd(&mut self) -> io::Result<()> {
    let reply = format!("257 \"{}\" is your current directory", self.cwd);
    self.send(reply).await
  }

  async fn cmd_cwd(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No directory name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    match stat(self, &path) {
      Some(info) if info.dir => {
        self.cwd = path;
        self.send("250 Directory successfully changed.").await
      }
      _ => {
        self
          .send(format!("550 Can't change directory to {path}"))
          .await
      }
    }
  }

  async fn cmd_mode(&mut self) -> io::Result<()> {
    if self.parameters == "S" {
      self.send("200 S Ok").await
    } else {
      self.send("504 Only S(tream) is supported").await
    }
  }

  async fn cmd_stru(&mut self) -> io::Result<()> {
    if self.parameters == "F" {
      self.send("200 F Ok").await
    } else {
      self.send("504 Only F(ile) is supported").await
    }
  }

  async fn cmd_type(&mut self) -> io::Result<()> {
    match self.parameters.as_str() {
      "A" => self.send("200 TYPE is now ASCII").await,
      "I" => self.send("200 TYPE is now 8-bit binary").await,
      _ => self.send("504 Unknown TYPE").await,
    }
  }

  async fn cmd_pasv(&mut self) -> io::Result<()> {
    self.data_stream = None;
    self.data_port = self.pasv_port();
    if !self.ensure_data_listener().await {
      self.data_mode = DataMode::NotSet;
      return self.send("425 Can't create connection").await;
    }
    self.data_mode = DataMode::Passive;
    let ip = self.server_ip.octets();
    let reply = format!(
      "227 Entering Passive Mode ({},{},{},{},{},{}).",
      ip[0],
      ip[1],
      ip[2],
      ip[3],
      self.data_port >> 8,
      self.data_port & 0xff
    );
    self.send(reply).await
  }

  async fn cmd_port(&mut self) -> io::Result<()> {
    self.data_stream = None;
    match parse_port(&self.parameters) {
      Some((ip, port)) => {
        self.client_ip = ip;
        self.data_port = port;
        self.data_mode = DataMode::Active;
        self.send("200 PORT command successful").await
      }
      None => {
        self.data_mode = DataMode::NotSet;
        self.send("501 Can't interpret parameters").await
      }
    }
  }

  async fn cmd_list(&mut self) -> io::Result<()> {
    send_listing(self, ListKind::List).await
  }

  async fn cmd_nlst(&mut self) -> io::Result<()> {
    send_listing(self, ListKind::Nlst).await
  }

  async fn cmd_mlsd(&mut self) -> io::Result<()> {
    send_listing(self, ListKind::Mlsd).await
  }

  async fn cmd_dele(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    if stat(self, &path).is_none() {
      let reply = format!("550 File {} not found", self.parameters);
      return self.send(reply).await;
    }
    if self.volume.remove_file(&path).is_err() {
      let reply = format!("450 Can't delete {}", self.parameters);
      return self.send(reply).await;
    }
    let reply = format!("250 Deleted {}", self.parameters);
    self.send(reply).await
  }

  async fn cmd_noop(&mut self) -> io::Result<()> {
    self.send("200 Zzz...").await
  }

  async fn cmd_retr(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    let Some(info) = stat(self, &path) else {
      let reply = format!("550 File {} not found", self.parameters);
      return self.send(reply).await;
    };
    if info.dir {
      let reply = format!("450 Can't open {}", self.parameters);
      return self.send(reply).await;
    }
    let mut file = match self.volume.open_read(&path) {
      Ok(file) => file,
      Err(_) => {
        let reply = format!("450 Can't open {}", self.parameters);
        return self.send(reply).await;
      }
    };
    if !self.data_open().await? {
      return Ok(());
    }
    self
      .send(format!(
        "150 Connected to port {}, {} bytes to download",
        self.data_port, info.size
      ))
      .await?;

    let mut buf = [0u8; FTP_BUF_SIZE];
    loop {
      let read = match file.read(&mut buf) {
        Ok(n) => n,
        Err(_) => {
          self.send("451 Communication error during transfer").await?;
          break;
        }
      };
      if read == 0 {
        break;
      }
      let sent = match self.data_stream.as_mut() {
        Some(stream) => stream.write_all(&buf[..read]).await.is_ok(),
        None => false,
      };
      if !sent {
        self.send("426 Error during file transfer").await?;
        break;
      }
    }
    drop(file);
    self.data_close();
    self.send("226 File successfully transferred").await
  }

  async fn cmd_stor(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    let mut file = match self.volume.create(&path) {
      Ok(file) => file,
      Err(_) => {
        let reply = format!("450 Can't create {}", self.parameters);
        return self.send(reply).await;
      }
    };
    if !self.data_open().await? {
      return Ok(());
    }
    self
      .send(format!("150 Connected to port {}", self.data_port))
      .await?;

    // incoming buffers are staged into a fixed-size block, full blocks
    // are flushed to the file, the last partial block on clean close
    let mut netbuf = [0u8; NET_BUF_SIZE];
    let mut block = [0u8; FTP_BUF_SIZE];
    let mut filled = 0usize;
    loop {
      let received = match self.data_stream.as_mut() {
        Some(stream) => stream.read(&mut netbuf).await,
        None => Ok(0),
      };
      match received {
        Ok(0) => {
          if filled > 0 && file.write_all(&block[..filled]).is_err() {
            self.send("451 Communication error during transfer").await?;
          }
          break;
        }
        Ok(n) => {
          let mut pos = 0usize;
          let mut failed = false;
          while pos < n {
            let take = (FTP_BUF_SIZE - filled).min(n - pos);
            block[filled..filled + take].copy_from_slice(&netbuf[pos..pos + take]);
            filled += take;
            pos += take;
            if filled == FTP_BUF_SIZE {
              if file.write_all(&block).is_err() {
                failed = true;
                break;
              }
              filled = 0;
            }
          }
          if failed {
            self.send("451 Communication error during transfer").await?;
            break;
          }
        }
        Err(_) => {
          self.send("426 Error during file transfer").await?;
          break;
        }
      }
    }
    drop(file);
    self.data_close();
    self.send("226 File successfully transferred").await
  }

  async fn cmd_mkd(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No directory name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    if stat(self, &path).is_some() {
      let reply = format!("521 \"{}\" directory already exists", self.parameters);
      return self.send(reply).await;
    }
    if self.volume.create_dir(&path).is_err() {
      let reply = format!("550 Can't create \"{}\"", self.parameters);
      return self.send(reply).await;
    }
    let reply = format!("257 \"{}\" created", self.parameters);
    self.send(reply).await
  }

  async fn cmd_rmd(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No directory name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    if stat(self, &path).is_none() {
      let reply = format!("550 Directory \"{}\" not found", self.parameters);
      return self.send(reply).await;
    }
    if self.volume.remove_dir(&path).is_err() {
      let reply = format!("501 Can't delete \"{}\"", self.parameters);
      return self.send(reply).await;
    }
    let reply = format!("250 \"{}\" removed", self.parameters);
    self.send(reply).await
  }

  async fn cmd_rnfr(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    if stat(self, &path).is_none() {
      let reply = format!("550 File {} not found", self.parameters);
      return self.send(reply).await;
    }
    self.rename_from = path;
    self
      .send("350 RNFR accepted - file exists, ready for destination")
      .await
  }

  async fn cmd_rnto(&mut self) -> io::Result<()> {
    if self.rename_from.is_empty() {
      return self.send("503 Need RNFR before RNTO").await;
    }
    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    if stat(self, &path).is_some() {
      let reply = format!("553 {} already exists", self.parameters);
      return self.send(reply).await;
    }
    // the destination's parent must exist and be a directory, unless it
    // is the root itself
    if let Some(slash) = path.rfind('/') {
      if slash > 0 {
        let parent = &path[..slash];
        match stat(self, parent) {
          Some(info) if info.dir => {}
          _ => return self.send("550 Directory not found").await,
        }
      }
    }
    let from = self.rename_from.clone();
    if self.volume.rename(&from, &path).is_err() {
      return self.send("451 Rename/move failure").await;
    }
    self.send("250 File successfully renamed or moved").await
  }

  async fn cmd_feat(&mut self) -> io::Result<()> {
    self
      .send("211-Extensions supported:\r\n MDTM\r\n MLSD\r\n SIZE\r\n SITE FREE\r\n211 End.")
      .await
  }

  async fn cmd_mdtm(&mut self) -> io::Result<()> {
    // a 14-digit prefix plus space means "set mtime", otherwise the whole
    // parameter is a file name to query
    let set = self.parameters.len() > 15
      && self.parameters.as_bytes()[14] == b' '
      && self.parameters.as_bytes()[..14].iter().all(u8::is_ascii_digit);
    if set {
      let stamp = String::from(&self.parameters[..14]);
      let name = String::from(self.parameters[15..].trim_start_matches(' '));
      let Some((date, time)) = datetime::parse_timestamp(&stamp) else {
        return self.send("501 Can't interpret parameters").await;
      };
      let Some(path) = paths::resolve(&name, &self.cwd) else {
        return self.send("500 Path name too long").await;
      };
      if stat(self, &path).is_none() {
        let reply = format!("550 File {name} not found");
        return self.send(reply).await;
      }
      if self.volume.set_times(&path, date, time).is_err() {
        return self.send("550 Unable to modify time").await;
      }
      return self.send("200 Ok").await;
    }

    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    match stat(self, &path) {
      Some(info) => {
        let reply = format!("213 {}", datetime::format_timestamp(info.date, info.time));
        self.send(reply).await
      }
      None => {
        let reply = format!("550 File {} not found", self.parameters);
        self.send(reply).await
      }
    }
  }

  async fn cmd_size(&mut self) -> io::Result<()> {
    if self.parameters.is_empty() {
      return self.send("501 No file name").await;
    }
    let Some(path) = paths::resolve(&self.parameters, &self.cwd) else {
      return self.send("500 Path name too long").await;
    };
    match stat(self, &path) {
      Some(info) if !info.dir => self.send(format!("213 {}", info.size)).await,
      Some(_) => self.send("550 No such file").await,
      None => {
        let reply = format!("550 File {} not found", self.parameters);
        self.send(reply).await
      }
    }
  }

  async fn cmd_site(&mut self) -> io::Result<()> {
    if self.parameters == "FREE" {
      let (free, total) = match self.volume.get_free() {
        Ok(space) => space,
        Err(_) => return self.send("550 Can't get free space").await,
      };
      let reply = format!(
        "211 {} MB free of {} MB capacity",
        free >> 20,
        total >> 20
      );
      return self.send(reply).await;
    }
    let reply = format!("550 Unknown SITE command {}", self.parameters);
    self.send(reply).await
  }

  async fn cmd_stat(&mut self) -> io::Result<()> {
    let reply = format!(
      "221 FTP Server status: you will be disconnected after {FTP_TIME_OUT} minutes of inactivity"
    );
    self.send(reply).await
  }
}

async fn send_listing(session: &mut Session, kind: ListKind) -> io::Result<()> {
  let Some(path) = paths::resolve(&session.parameters, &session.cwd) else {
    return session.send("500 Path name too long").await;
  };
  let entries = match session.volume.read_dir(&path) {
    Ok(entries) => entries,
    Err(_) => {
      return session
        .send(format!("550 Can't open directory {path}"))
        .await
    }
  };
  if !session.data_open().await? {
    return Ok(());
  }
  session.send("150 Accepted data connection").await?;

  let mut matches = 0usize;
  for entry in &entries {
    if entry.display_name().starts_with('.') {
      continue;
    }
    let line = listing_line(kind, entry);
    let sent = match session.data_stream.as_mut() {
      Some(stream) => stream.write_all(line.as_bytes()).await.is_ok(),
      None => false,
    };
    if !sent {
      break;
    }
    matches += 1;
  }
  session.data_close();

  match kind {
    ListKind::Mlsd => {
      session
        .send(format!("226 Options: -a -l, {matches} matches total"))
        .await
    }
    _ => session.send("226 Directory send OK.").await,
  }
}

/// Volume lookups inside handlers treat any failure as a miss; the
/// distinction surfaces to the client as the same 5xx reply.
fn stat(session: &Session, path: &str) -> Option<EntryInfo> {
  session.volume.stat(path).ok().flatten()
}

/// Parses the six comma-separated PORT numbers into address and port.
fn parse_port(parameters: &str) -> Option<(Ipv4Addr, u16)> {
  let mut fields = parameters.split(',');
  let mut next = || fields.next()?.trim().parse::<u8>().ok();
  let ip = Ipv4Addr::new(next()?, next()?, next()?, next()?);
  let p1 = next()? as u16;
  let p2 = next()? as u16;
  if fields.next().is_some() {
    return None;
  }
  Some((ip, p1 * 256 + p2))
}

fn listing_line(kind: ListKind, entry: &EntryInfo) -> String {
  let name = entry.display_name();
  match kind {
    ListKind::Nlst => format!("{name}\r\n"),
    ListKind::List => {
      if entry.dir {
        format!("+/,\t{name}\r\n")
      } else {
        format!("+r,s{},\t{name}\r\n", entry.size)
      }
    }
    ListKind::Mlsd => {
      let kind = if entry.dir { "dir" } else { "file" };
      if entry.date != 0 {
        format!(
          "Type={kind};Size={};Modify={}; {name}\r\n",
          entry.size,
          datetime::format_timestamp(entry.date, entry.time)
        )
      } else {
        format!("Type={kind};Size={}; {name}\r\n", entry.size)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_port() {
    let (ip, port) = parse_port("192,168,0,10,217,66").unwrap();
    assert_eq!(ip, Ipv4Addr::new(192, 168, 0, 10));
    assert_eq!(port, 217 * 256 + 66);
  }

  #[test]
  fn test_parse_port_rejects_malformed() {
    assert!(parse_port("").is_none());
    assert!(parse_port("1,2,3,4,5").is_none());
    assert!(parse_port("1,2,3,4,5,6,7").is_none());
    assert!(parse_port("1,2,3,4,5,256").is_none());
    assert!(parse_port("a,b,c,d,e,f").is_none());
  }

  #[test]
  fn test_listing_lines() {
    let dir = EntryInfo {
      name: String::from("sub"),
      lfn: None,
      size: 0,
      date: 0,
      time: 0,
      dir: true,
    };
    let file = EntryInfo {
      name: String::from("hello.bin"),
      lfn: None,
      size: 5,
      date: crate::ftp::datetime::pack_date(2020, 2, 19),
      time: crate::ftp::datetime::pack_time(13, 45, 28),
      dir: false,
    };
    assert_eq!(listing_line(ListKind::List, &dir), "+/,\tsub\r\n");
    assert_eq!(listing_line(ListKind::List, &file), "+r,s5,\thello.bin\r\n");
    assert_eq!(listing_line(ListKind::Nlst, &file), "hello.bin\r\n");
    assert_eq!(
      listing_line(ListKind::Mlsd, &file),
      "Type=file;Size=5;Modify=20200219134528; hello.bin\r\n"
    );
    assert_eq!(listing_line(ListKind::Mlsd, &dir), "Type=dir;Size=0; sub\r\n");
  }
}
