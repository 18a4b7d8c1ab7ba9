mod arg_parser;
mod ftp;

use ftp::server::Server;

#[tokio::main]
async fn main() -> std::io::Result<()> {
  env_logger::init();
  let args = arg_parser::Args::parse_args();

  let server = Server::new(args).await?;
  server.listen().await;

  Ok(())
}
