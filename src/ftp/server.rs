//! Control-port accept loop and session slots.
//!
//! A fixed number of clients is served simultaneously. Each accepted
//! connection takes a free slot; the slot index selects the session's
//! passive data port, so live sessions never share one. The slot table
//! stays with the accept loop, sessions only ever see their own index.

use log::{info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::arg_parser::Args;
use crate::ftp::session::Session;
use crate::ftp::volume::Volume;

const NO_CONN_ALLOWED: &[u8] = b"421 No more connections allowed\r\n";

pub struct Server {
  listener: TcpListener,
  volume: Arc<Volume>,
  data_port_base: u16,
  slots: Arc<Mutex<Vec<bool>>>,
}

impl Server {
  pub async fn new(cfg: Args) -> io::Result<Self> {
    let listener = TcpListener::bind(format!("{}:{}", cfg.host, cfg.port)).await?;
    let volume = Arc::new(Volume::new(&cfg.folder)?);
    Ok(Self {
      listener,
      volume,
      data_port_base: cfg.data_port_base,
      slots: Arc::new(Mutex::new(vec![false; cfg.clients])),
    })
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  pub async fn listen(&self) {
    if let Ok(addr) = self.listener.local_addr() {
      info!("Listening on {addr}");
    }
    loop {
      match self.listener.accept().await {
        Ok((socket, addr)) => self.handle(socket, addr).await,
        Err(e) => {
          warn!("Accept failed: {e}");
          continue;
        }
      }
    }
  }

  async fn handle(&self, mut socket: TcpStream, addr: SocketAddr) {
    let index = {
      let mut slots = self.slots.lock().await;
      match slots.iter().position(|busy| !*busy) {
        Some(index) => {
          slots[index] = true;
          index
        }
        None => {
          let _ = socket.write_all(NO_CONN_ALLOWED).await;
          info!("FTP connection denied, all connections in use");
          return;
        }
      }
    };

    info!("FTP {index} connected: {addr}");
    let volume = self.volume.clone();
    let slots = self.slots.clone();
    let pasv_port = self.data_port_base + index as u16;
    tokio::spawn(async move {
      Session::new(socket, index, pasv_port, volume).service().await;
      slots.lock().await[index] = false;
      info!("FTP {index} disconnected");
    });
  }
}
