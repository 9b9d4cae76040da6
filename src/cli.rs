use clap::Parser;
use std::net::SocketAddr;

use crate::serve::INDEX_DOCUMENT;

#[derive(Parser, Debug)]
#[command(name = "zipserve")]
#[command(version)]
#[command(about = "Serve the contents of a ZIP archive over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipserve site.zip                          serve site.zip on 127.0.0.1:8000\n  \
  zipserve -l 0.0.0.0:80 --index home.html site.zip\n  \
  zipserve https://example.com/docs.zip      serve a remote archive via Range requests")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Address to listen on
    #[arg(short = 'l', long, value_name = "ADDR", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Document served for directory requests
    #[arg(long, value_name = "NAME", default_value = INDEX_DOCUMENT)]
    pub index: String,

    /// Buffer whole entries in memory when serving decompressed, enabling
    /// range requests on every file
    #[arg(long)]
    pub buffered: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.archive.starts_with("http://") || self.archive.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["zipserve", "site.zip"]).unwrap();
        assert_eq!(cli.listen, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(cli.index, "index.html");
        assert!(!cli.buffered);
        assert!(!cli.is_http_url());
    }

    #[test]
    fn test_options() {
        let cli = Cli::try_parse_from([
            "zipserve",
            "--listen",
            "0.0.0.0:9000",
            "--index",
            "home.htm",
            "--buffered",
            "https://example.com/a.zip",
        ])
        .unwrap();
        assert_eq!(cli.listen.port(), 9000);
        assert_eq!(cli.index, "home.htm");
        assert!(cli.buffered);
        assert!(cli.is_http_url());
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(Cli::try_parse_from(["zipserve", "-l", "nowhere", "a.zip"]).is_err());
    }
}
