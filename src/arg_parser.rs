use clap::Parser;

/// CMS FTP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Folder path to serve
    #[arg(long, default_value_t = String::from("./"))]
    pub folder: String,

    /// Listening host
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    pub host: String,

    /// Control connection port
    #[arg(long, default_value_t = 21)]
    pub port: u16,

    /// First passive-mode data port; each client slot gets base + slot index
    #[arg(long, default_value_t = 55600)]
    pub data_port_base: u16,

    /// Number of clients served simultaneously
    #[arg(long, default_value_t = 2)]
    pub clients: usize,
}

impl Args {
    pub fn parse_args() -> Args {
        self::Parser::parse()
    }
}
