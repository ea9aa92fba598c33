//! Command line flags.

use clap::Parser;
use shadowrun::ServerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "shadowd",
    about = "Analysis server for shadow-heap event streams",
    after_help = "\
EXAMPLES:
    shadowd                                   Listen on 127.0.0.1:11218
    shadowd --listen 0.0.0.0:11218 --sessions 1
    RUST_LOG=shadowrun=debug shadowd          Per-frame logging"
)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "SHADOWD_LISTEN", default_value = "127.0.0.1:11218")]
    pub listen: String,

    /// Largest accepted frame body in bytes (default 64 MiB)
    #[arg(long, env = "SHADOWD_MAX_FRAME")]
    pub max_frame: Option<usize>,

    /// Size of a single socket read in bytes
    #[arg(long, env = "SHADOWD_READ_CHUNK")]
    pub read_chunk: Option<usize>,

    /// Freed object ids remembered per session (0 = forget frees immediately)
    #[arg(long, env = "SHADOWD_MAX_TOMBSTONES")]
    pub max_tombstones: Option<usize>,

    /// Method prefix the counting analysis is installed under
    #[arg(long, env = "SHADOWD_ANALYSIS", default_value = "analysis.Remote")]
    pub analysis: String,

    /// Exit after serving this many sessions (0 = unlimited)
    #[arg(long, env = "SHADOWD_SESSIONS", default_value = "0")]
    pub sessions: u64,

    /// Log filter in RUST_LOG syntax; overrides RUST_LOG
    #[arg(long, env = "SHADOWD_LOG")]
    pub log: Option<String>,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default().with_listen(self.listen.clone());
        if let Some(max_frame) = self.max_frame {
            config = config.with_max_frame(max_frame);
        }
        if let Some(read_chunk) = self.read_chunk {
            config = config.with_read_chunk(read_chunk);
        }
        if let Some(max_tombstones) = self.max_tombstones {
            config = config.with_max_tombstones(max_tombstones);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["shadowd"]);
        let config = args.server_config();
        assert_eq!(config.listen, "127.0.0.1:11218");
        assert_eq!(config.max_frame, ServerConfig::default().max_frame);
        assert_eq!(config.max_tombstones, ServerConfig::default().max_tombstones);
        assert_eq!(args.analysis, "analysis.Remote");
        assert_eq!(args.sessions, 0);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "shadowd",
            "--listen",
            "0.0.0.0:9000",
            "--max-frame",
            "1024",
            "--read-chunk",
            "512",
            "--max-tombstones",
            "100",
            "--sessions",
            "2",
        ]);
        let config = args.server_config();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.max_frame, 1024);
        assert_eq!(config.read_chunk, 512);
        assert_eq!(config.max_tombstones, 100);
        assert_eq!(args.sessions, 2);
    }
}
