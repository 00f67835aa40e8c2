use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::{CaptureSource, ConfigOverrides};

#[derive(Parser)]
#[command(name = "picam")]
#[command(about = "📷 Network camera agent: advertise, stream JPEG frames, take settings from one peer", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the camera agent until Ctrl-C
    Serve(ServeArgs),

    /// Connect to a camera, save frames and optionally change settings
    View {
        /// Camera name to look for on the LAN [default: picam]
        #[arg(short, long, conflicts_with = "connect")]
        name: Option<String>,

        /// Control endpoint to contact directly, skipping discovery
        #[arg(short, long)]
        connect: Option<SocketAddr>,

        /// Port to receive frames on
        #[arg(short, long, default_value_t = 7896)]
        port: u16,

        /// UDP port to listen for beacons on
        #[arg(long, default_value_t = 9999)]
        beacon_port: u16,

        /// Where to write the latest frame
        #[arg(short, long, default_value = "frame.jpg")]
        output: PathBuf,

        /// Setting to change, e.g. `--set brightness=80` (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        settings: Vec<String>,

        /// Stop after this many frames
        #[arg(short, long, default_value_t = 30)]
        frames: u64,

        /// Seconds to wait for discovery and the frame connection
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },

    /// Print the factory default settings as JSON
    Defaults {
        /// Describe a camera without pan/tilt
        #[arg(long)]
        no_pan_tilt: bool,
    },
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Camera name to advertise
    #[arg(short, long)]
    pub name: Option<String>,

    /// Peer port for the frame channel
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Control endpoint port
    #[arg(long)]
    pub control_port: Option<u16>,

    /// UDP port beacons are sent to
    #[arg(long)]
    pub beacon_port: Option<u16>,

    /// Camera has no pan/tilt servos
    #[arg(long)]
    pub no_pan_tilt: bool,

    /// Seconds per advertise attempt
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Frame source
    #[arg(short, long, value_enum)]
    pub source: Option<CaptureSource>,

    /// Clockwise frame rotation in degrees
    #[arg(short, long)]
    pub rotation: Option<u32>,
}

impl ServeArgs {
    /// Flags the user actually set, as config overrides
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            camera_name: self.name.clone(),
            frame_port: self.port,
            control_port: self.control_port,
            beacon_port: self.beacon_port,
            pan_tilt_enabled: self.no_pan_tilt.then_some(false),
            advertise_timeout_secs: self.timeout,
            source: self.source,
            rotation: self.rotation,
            ..Default::default()
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "picam", "serve", "--name", "porch", "--no-pan-tilt", "--source", "libcamera",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let o = args.overrides();
        assert_eq!(o.camera_name.as_deref(), Some("porch"));
        assert_eq!(o.pan_tilt_enabled, Some(false));
        assert_eq!(o.source, Some(CaptureSource::Libcamera));
        assert_eq!(o.frame_port, None);
    }

    #[test]
    fn test_unset_pan_tilt_flag_leaves_config_alone() {
        let cli = Cli::try_parse_from(["picam", "-v", "serve"]).unwrap();
        assert!(cli.verbose);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.overrides(), ConfigOverrides::default());
    }

    #[test]
    fn test_view_collects_settings() {
        let cli = Cli::try_parse_from([
            "picam",
            "view",
            "--connect",
            "10.0.0.5:7895",
            "--set",
            "brightness=80",
            "--set",
            "servos.pan=10",
        ])
        .unwrap();
        match cli.command {
            Commands::View {
                connect, settings, ..
            } => {
                assert_eq!(connect, Some("10.0.0.5:7895".parse().unwrap()));
                assert_eq!(settings, vec!["brightness=80", "servos.pan=10"]);
            }
            _ => panic!("expected view"),
        }
    }
}
