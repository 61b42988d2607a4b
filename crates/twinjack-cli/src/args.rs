use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "twinjack",
    author,
    version,
    about = "Rogue access point session orchestrator"
)]
pub struct Cli {
    /// Override the runtime directory (state, captures, generated configs)
    #[arg(long, global = true)]
    pub runtime_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an attack session and run until interrupted
    Start(StartArgs),
    /// Show the current (or last) session status
    Status,
    /// Stop the running session and wait for cleanup
    Stop,
    /// List captured credentials
    Creds,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Target network name
    #[arg(long)]
    pub ssid: String,

    /// Target access point BSSID (aa:bb:cc:dd:ee:ff)
    #[arg(long)]
    pub bssid: String,

    /// Target channel
    #[arg(long)]
    pub channel: u8,

    /// Encryption advertised by the target
    #[arg(long, value_enum, default_value_t = Encryption::Wpa2)]
    pub encryption: Encryption,

    /// Interface hosting the rogue AP
    #[arg(long)]
    pub ap_iface: Option<String>,

    /// Interface sending deauthentication bursts
    #[arg(long)]
    pub deauth_iface: Option<String>,

    /// Interface used to verify captured credentials
    #[arg(long)]
    pub verify_iface: Option<String>,

    /// Internet-facing uplink interface
    #[arg(long)]
    pub internet_iface: Option<String>,

    /// Auto-select interfaces for any role not pinned above
    #[arg(long)]
    pub auto_select: bool,

    /// Verify captured credentials against the real target
    #[arg(long)]
    pub verify: bool,

    /// Deauthenticate only these clients (repeatable); broadcast otherwise
    #[arg(long = "deauth-client")]
    pub deauth_clients: Vec<String>,

    /// Seconds between deauthentication bursts
    #[arg(long)]
    pub deauth_interval: Option<u64>,

    /// Port the capture portal listens on
    #[arg(long)]
    pub portal_port: Option<u16>,

    /// Custom login page HTML file
    #[arg(long)]
    pub page: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Encryption {
    Open,
    Wpa,
    Wpa2,
    Wpa3,
}

impl From<Encryption> for twinjack_core::EncryptionKind {
    fn from(value: Encryption) -> Self {
        match value {
            Encryption::Open => twinjack_core::EncryptionKind::Open,
            Encryption::Wpa => twinjack_core::EncryptionKind::WpaPsk,
            Encryption::Wpa2 => twinjack_core::EncryptionKind::Wpa2Psk,
            Encryption::Wpa3 => twinjack_core::EncryptionKind::Wpa3Sae,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_arguments_parse() {
        let cli = Cli::try_parse_from([
            "twinjack",
            "start",
            "--ssid",
            "Lab",
            "--bssid",
            "AA:BB:CC:DD:EE:FF",
            "--channel",
            "6",
            "--ap-iface",
            "wlan0",
            "--deauth-iface",
            "wlan1",
            "--verify",
            "--deauth-client",
            "11:22:33:44:55:66",
            "--deauth-client",
            "66:55:44:33:22:11",
        ])
        .unwrap();

        match cli.command {
            Commands::Start(args) => {
                assert_eq!(args.ssid, "Lab");
                assert_eq!(args.channel, 6);
                assert_eq!(args.ap_iface.as_deref(), Some("wlan0"));
                assert!(args.verify);
                assert_eq!(args.deauth_clients.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn missing_target_is_rejected() {
        assert!(Cli::try_parse_from(["twinjack", "start", "--ssid", "Lab"]).is_err());
    }

    #[test]
    fn status_parses_with_runtime_dir() {
        let cli = Cli::try_parse_from(["twinjack", "--runtime-dir", "/tmp/tj", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.runtime_dir.as_deref(), Some(std::path::Path::new("/tmp/tj")));
    }
}
