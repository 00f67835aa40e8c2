use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use picam::actuator::PanTilt;
use picam::capture::libcamera::LibcameraStill;
use picam::capture::test_pattern::TestPattern;
use picam::capture::{CaptureDevice, CaptureStage, PostProcess};
use picam::cli::{Cli, Commands, ServeArgs};
use picam::config::{AgentConfig, CaptureSource};
use picam::discovery::Advertiser;
use picam::peer::{self, PeerClient};
use picam::session::{Hardware, LinkParams, Session};
use picam::settings::{SettingName, SettingsSnapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve(args) => {
            serve(args).await?;
        }
        Commands::View {
            name,
            connect,
            port,
            beacon_port,
            output,
            settings,
            frames,
            timeout,
        } => {
            let control = match connect {
                Some(addr) => addr,
                None => {
                    let name = name.unwrap_or_else(|| "picam".to_string());
                    peer::discover(&name, beacon_port, Duration::from_secs(timeout)).await?
                }
            };
            view(control, port, &output, &settings, frames, Duration::from_secs(timeout)).await?;
        }
        Commands::Defaults { no_pan_tilt } => {
            let snapshot = SettingsSnapshot::defaults(!no_pan_tilt);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "picam=debug" } else { "picam=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = AgentConfig::load(args.config.as_deref(), args.overrides())
        .context("Failed to load configuration")?;
    info!(
        "📷 {} starting ({:?} source, pan/tilt {})",
        config.camera_name,
        config.source,
        if config.pan_tilt_enabled { "on" } else { "off" }
    );

    let stage = CaptureStage::start(
        open_camera(&config),
        PostProcess {
            rotation: config.rotation(),
            quality: config.jpeg_quality,
        },
    );
    let pan_tilt = if config.pan_tilt_enabled {
        Some(open_pan_tilt()?)
    } else {
        None
    };
    let mut hardware = Hardware::new(stage, pan_tilt);
    let mut snapshot = config.initial_snapshot();

    let mut advertiser = Advertiser::bind(
        config.camera_name.clone(),
        config.control_addr(),
        config.beacon_target(),
    )
    .await
    .context("Failed to open control endpoint")?;
    info!("🎛️  Control endpoint on {}", advertiser.local_addr()?);

    let params = LinkParams {
        frame_port: config.frame_port,
        write_timeout: config.write_timeout(),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = stop_tx.send(true);
        }
    });

    loop {
        let mut session = Session::new(snapshot, hardware);
        let connected = wait_for_peer(
            &mut session,
            &mut advertiser,
            params,
            config.advertise_timeout(),
            stop_rx.clone(),
        )
        .await;

        if connected {
            match session.run(stopped(stop_rx.clone())).await {
                Ok(reason) => info!("Session over: {}", reason),
                Err(e) => warn!("Session over: {}", e),
            }
        }

        // Peer-made changes carry over to the next session
        (snapshot, hardware) = session.into_parts();

        if *stop_rx.borrow() {
            break;
        }
        if !connected {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    hardware.release();
    hardware.capture.stop();
    info!("👋 Bye");
    Ok(())
}

/// Advertise until a peer connects (`true`) or we are told to stop.
async fn wait_for_peer(
    session: &mut Session,
    advertiser: &mut Advertiser,
    params: LinkParams,
    wait: Duration,
    stop: watch::Receiver<bool>,
) -> bool {
    let stop_signal = stopped(stop);
    tokio::pin!(stop_signal);

    loop {
        tokio::select! {
            _ = &mut stop_signal => return false,
            result = session.establish(advertiser, params, wait) => match result {
                Ok(()) => return true,
                Err(e) if e.is_timeout() => debug!("No peer yet, advertising again"),
                Err(e) => {
                    warn!("Could not start session: {}", e);
                    return false;
                }
            }
        }
    }
}

/// Resolves once the stop flag is set.
async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn open_camera(config: &AgentConfig) -> Box<dyn CaptureDevice> {
    match config.source {
        CaptureSource::Test => Box::new(TestPattern::new(config.jpeg_quality)),
        CaptureSource::Libcamera => Box::new(LibcameraStill::new(
            config.libcamera_program.clone(),
            config.jpeg_quality,
        )),
    }
}

#[cfg(feature = "rpi")]
fn open_pan_tilt() -> Result<Box<dyn PanTilt>> {
    picam::actuator::open_hardware()
}

#[cfg(not(feature = "rpi"))]
fn open_pan_tilt() -> Result<Box<dyn PanTilt>> {
    info!("Built without the rpi feature; pan/tilt is simulated");
    Ok(Box::new(picam::actuator::SimulatedPanTilt::new()))
}

async fn view(
    control: SocketAddr,
    port: u16,
    output: &Path,
    settings: &[String],
    frames: u64,
    wait: Duration,
) -> Result<()> {
    let frame_bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let mut client = PeerClient::contact(control, frame_bind, wait).await?;
    println!("✅ Connected to camera at {}", client.camera());

    if !settings.is_empty() {
        let mut request = client.settings().clone();
        for pair in settings {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("Expected NAME=VALUE, got {:?}", pair))?;
            let name: SettingName = name.trim().parse()?;
            request.set_raw(name, value)?;
        }

        let reply = client.update(request).await?;
        if reply.accepted {
            println!("⚙️  Settings accepted");
        } else {
            println!(
                "⚠️  Settings rejected: {}",
                reply.reason.as_deref().unwrap_or("no reason given")
            );
        }
    }

    let mut received = 0u64;
    while received < frames {
        match client.next_frame().await? {
            Some(jpeg) => {
                tokio::fs::write(output, &jpeg)
                    .await
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                received += 1;
            }
            None => {
                println!("Camera closed the frame channel");
                break;
            }
        }
    }
    println!(
        "📷 {} frames received, latest saved to {}",
        received,
        output.display()
    );

    client.disconnect().await?;
    Ok(())
}
