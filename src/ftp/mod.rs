pub mod commands;
pub mod datetime;
pub mod handlers;
pub mod paths;
pub mod server;
pub mod session;
pub mod volume;

/// Version string advertised in the welcome banner.
pub const FTP_VERSION: &str = "2020-02-19";

pub const FTP_USER_NAME: &str = "user";
pub const FTP_USER_PASS: &str = "user";
pub const FTP_ADMIN_NAME: &str = "oxipack";
pub const FTP_ADMIN_PASS: &str = "admin";

/// Minutes of inactivity before a logged-in client is disconnected.
pub const FTP_TIME_OUT: u64 = 10;

/// Chunk size for file transfers.
pub const FTP_BUF_SIZE: usize = 512;
