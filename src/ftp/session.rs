//! Per-connection session state and lifecycle.
//!
//! One session owns one accepted control connection for its whole life:
//! welcome banner, login gate, command loop with inactivity timeout,
//! teardown. All data-channel endpoints belong to the session and are
//! released on every exit path.

use log::{debug, info, warn};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::ftp::commands::{self, Parse, NET_BUF_SIZE};
use crate::ftp::handlers::{Flow, FtpCommands};
use crate::ftp::volume::Volume;
use crate::ftp::{
  FTP_ADMIN_NAME, FTP_ADMIN_PASS, FTP_TIME_OUT, FTP_USER_NAME, FTP_USER_PASS, FTP_VERSION,
};

/// Receive timeout while a client is logging in.
const LOGIN_TIME_OUT: Duration = Duration::from_secs(10);

/// Receive timeout for the steady-state command loop.
const COMMAND_TIME_OUT: Duration = Duration::from_secs(FTP_TIME_OUT * 60);

/// How long a passive-mode transfer waits for the client to dial in.
const PASV_ACCEPT_TIME_OUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
  NotSet,
  Passive,
  Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminLevel {
  None,
  AwaitingPassword,
  Admin,
}

#[derive(Debug)]
enum ReadError {
  Timeout,
  Closed,
  Io(io::Error),
}

pub struct Session {
  control: TcpStream,
  index: usize,
  pub(crate) server_ip: Ipv4Addr,
  peer_ip: Ipv4Addr,
  pub(crate) volume: Arc<Volume>,

  // data channel
  data_listener: Option<TcpListener>,
  pub(crate) data_stream: Option<TcpStream>,
  pub(crate) data_mode: DataMode,
  pub(crate) client_ip: Ipv4Addr,
  pub(crate) data_port: u16,
  /// Port assigned to this session's slot for passive mode.
  pasv_port: u16,

  pub(crate) cwd: String,
  pub(crate) rename_from: String,
  pub(crate) admin: AdminLevel,
  pub(crate) command: String,
  pub(crate) parameters: String,
}

impl Session {
  pub fn new(control: TcpStream, index: usize, pasv_port: u16, volume: Arc<Volume>) -> Self {
    let server_ip = match control.local_addr() {
      Ok(SocketAddr::V4(addr)) => *addr.ip(),
      _ => Ipv4Addr::UNSPECIFIED,
    };
    let peer_ip = match control.peer_addr() {
      Ok(SocketAddr::V4(addr)) => *addr.ip(),
      _ => Ipv4Addr::UNSPECIFIED,
    };
    Self {
      control,
      index,
      server_ip,
      peer_ip,
      volume,
      data_listener: None,
      data_stream: None,
      data_mode: DataMode::NotSet,
      client_ip: Ipv4Addr::UNSPECIFIED,
      data_port: pasv_port,
      pasv_port,
      cwd: String::from("/"),
      rename_from: String::new(),
      admin: AdminLevel::None,
      command: String::new(),
      parameters: String::new(),
    }
  }

  /// Serves the connection until QUIT, inactivity timeout or socket error,
  /// then releases the data-channel endpoints. The control stream itself
  /// is dropped by the accept loop's task.
  pub async fn service(mut self) {
    info!("FTP {} serving client {}", self.index, self.peer_ip);
    if let Err(e) = self.run().await {
      debug!("FTP {} control stream error: {e}", self.index);
    }
    self.data_close();
    self.data_listener = None;
  }

  async fn run(&mut self) -> io::Result<()> {
    self
      .send(format!("220 -> CMS FTP Server, FTP Version {FTP_VERSION}"))
      .await?;

    if !self.login().await? {
      return Ok(());
    }

    loop {
      match self.read_command(COMMAND_TIME_OUT).await {
        Err(end) => {
          debug!("FTP {} command loop over: {end:?}", self.index);
          return Ok(());
        }
        Ok(Parse::SyntaxError) => self.send("500 Syntax error").await?,
        Ok(Parse::TooLong) => self.send("500 Command line too long").await?,
        Ok(Parse::Ok) => match self.dispatch().await? {
          Flow::Continue => {}
          Flow::Quit => {
            self.send("221 Goodbye").await?;
            return Ok(());
          }
        },
      }
    }
  }

  /// Two-step USER/PASS handshake against the fixed accounts. Socket
  /// errors and timeouts fail closed without a reply.
  async fn login(&mut self) -> io::Result<bool> {
    match self.read_command(LOGIN_TIME_OUT).await {
      Err(_) => return Ok(false),
      Ok(Parse::Ok) if self.command == "USER" => {}
      Ok(_) => {
        self.send("530 Login needed").await?;
        return Ok(false);
      }
    }
    if self.parameters == FTP_USER_NAME {
      self.admin = AdminLevel::None;
    } else if self.parameters == FTP_ADMIN_NAME {
      self.admin = AdminLevel::AwaitingPassword;
    } else {
      self.send("530 Login authentication failed").await?;
      return Ok(false);
    }
    self.send("331 OK. Password required").await?;

    match self.read_command(LOGIN_TIME_OUT).await {
      Err(_) => return Ok(false),
      Ok(Parse::Ok) if self.command == "PASS" => {}
      Ok(_) => {
        self.send("530 Login needed").await?;
        return Ok(false);
      }
    }
    let accepted = match self.admin {
      AdminLevel::AwaitingPassword => self.parameters == FTP_ADMIN_PASS,
      _ => self.parameters == FTP_USER_PASS,
    };
    if !accepted {
      self.send("530 Login authentication failed").await?;
      return Ok(false);
    }
    if self.admin == AdminLevel::AwaitingPassword {
      self.admin = AdminLevel::Admin;
      info!("FTP {} admin logged in", self.index);
      self.send("230 OK, logged in as admin").await?;
    } else {
      self.send("230 OK, logged in as user").await?;
    }
    Ok(true)
  }

  /// Reads one buffer from the control stream and parses it into the
  /// session command/parameter fields.
  async fn read_command(&mut self, limit: Duration) -> Result<Parse, ReadError> {
    let mut buf = [0u8; NET_BUF_SIZE];
    let n = match timeout(limit, self.control.read(&mut buf)).await {
      Err(_) => return Err(ReadError::Timeout),
      Ok(Err(e)) => return Err(ReadError::Io(e)),
      Ok(Ok(0)) => return Err(ReadError::Closed),
      Ok(Ok(n)) => n,
    };
    let parse = commands::parse_line(&buf[..n], &mut self.command, &mut self.parameters);
    debug!(
      "FTP {} command: {:?} parameters: {:?}",
      self.index, self.command, self.parameters
    );
    Ok(parse)
  }

  pub(crate) async fn send(&mut self, line: impl AsRef<str>) -> io::Result<()> {
    let line = line.as_ref();
    debug!("FTP {} reply: {line}", self.index);
    self.control.write_all(format!("{line}\r\n").as_bytes()).await
  }

  /// Lazily binds the passive listener on this session's assigned data
  /// port. The listener is reused by every subsequent passive transfer
  /// and only released at session teardown.
  pub(crate) async fn ensure_data_listener(&mut self) -> bool {
    if self.data_listener.is_some() {
      return true;
    }
    let addr = SocketAddr::new(IpAddr::V4(self.server_ip), self.pasv_port);
    match TcpListener::bind(addr).await {
      Ok(listener) => {
        self.data_listener = Some(listener);
        true
      }
      Err(e) => {
        warn!("FTP {} can't listen on {addr}: {e}", self.index);
        false
      }
    }
  }

  /// Port advertised by PASV.
  pub(crate) fn pasv_port(&self) -> u16 {
    self.pasv_port
  }

  /// Establishes the data stream for one transfer. Replies 425 itself and
  /// returns false when no connection can be made; on any failure the
  /// data-connection mode is reset.
  pub(crate) async fn data_open(&mut self) -> io::Result<bool> {
    match self.data_mode {
      DataMode::NotSet => {
        self.send("425 No data connection").await?;
        Ok(false)
      }
      DataMode::Passive => {
        let accepted = match &self.data_listener {
          Some(listener) => match timeout(PASV_ACCEPT_TIME_OUT, listener.accept()).await {
            Ok(Ok((stream, _))) => Some(stream),
            _ => None,
          },
          None => None,
        };
        match accepted {
          Some(stream) => {
            self.data_stream = Some(stream);
            Ok(true)
          }
          None => {
            self.data_mode = DataMode::NotSet;
            self.send("425 Can't create connection").await?;
            Ok(false)
          }
        }
      }
      DataMode::Active => match self.dial_client().await {
        Ok(stream) => {
          self.data_stream = Some(stream);
          Ok(true)
        }
        Err(e) => {
          warn!(
            "FTP {} can't connect to {}:{}: {e}",
            self.index, self.client_ip, self.data_port
          );
          self.data_mode = DataMode::NotSet;
          self.send("425 Can't create connection").await?;
          Ok(false)
        }
      },
    }
  }

  /// Active mode dials out from the session data port to the endpoint the
  /// client gave in PORT.
  async fn dial_client(&self) -> io::Result<TcpStream> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::new(IpAddr::V4(self.server_ip), self.data_port))?;
    socket
      .connect(SocketAddr::new(IpAddr::V4(self.client_ip), self.data_port))
      .await
  }

  /// Ends the current transfer: the data stream is released and the
  /// connection mode cleared. The passive listener stays for reuse.
  pub(crate) fn data_close(&mut self) {
    self.data_stream = None;
    self.data_mode = DataMode::NotSet;
  }
}
