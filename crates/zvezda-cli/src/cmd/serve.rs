use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use zvezda_core::config::{DoorSpec, DoorTiming, DoorsConfig, DOORS_ENV};
use zvezda_core::credentials::UserDb;
use zvezda_core::gpio::{GpioLine, SimulatedLine, SysfsLine, DEFAULT_SYSFS_ROOT};
use zvezda_core::{ActuationRegistry, AuthGate};
use zvezda_server::state::DEFAULT_VERIFICATION_WAIT;
use zvezda_server::{AppState, Assets};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "ZVEZDA_PORT", default_value_t = 3000)]
    port: u16,

    /// Serve UI files from disk instead of the embedded copy
    #[arg(long)]
    dev: bool,

    /// UI directory used with --dev
    #[arg(long, default_value = "crates/zvezda-server/static")]
    static_dir: PathBuf,

    /// Drive in-memory lines instead of real GPIO
    #[arg(long)]
    simulate: bool,

    /// sysfs GPIO root
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    gpio_root: PathBuf,

    /// sysfs number of the controller's first line, added to every door pin.
    /// Raspberry Pi kernels 6.6 and later use 512 or above; see gpiochip*/base
    #[arg(long, env = "ZVEZDA_GPIO_BASE", default_value_t = 0)]
    gpio_base: u32,

    /// Door as ID=PIN; repeatable. Falls back to PIN_INNERDOOR/PIN_OUTERDOOR
    #[arg(long = "door", value_name = "ID=PIN", env = DOORS_ENV, value_delimiter = ',')]
    doors: Vec<DoorSpec>,

    /// Seconds each door line stays asserted
    #[arg(long, default_value_t = 5)]
    hold_secs: u64,

    /// Minimum seconds between two openings of the same door
    #[arg(long, default_value_t = 10)]
    cooldown_secs: u64,

    /// Password checks allowed to run at once [default: CPU count, at least 4]
    #[arg(long, env = "ZVEZDA_MAX_LOGINS", value_parser = clap::value_parser!(u16).range(1..))]
    max_logins: Option<u16>,
}

pub fn run(db_path: &Path, args: ServeArgs) -> Result<()> {
    let config = doors_config(&args)?;

    let db = UserDb::open(db_path)
        .with_context(|| format!("cannot open credential database {}", db_path.display()))?;

    let registry = ActuationRegistry::from_config(&config, |spec| -> Box<dyn GpioLine> {
        if args.simulate {
            Box::new(SimulatedLine::new(spec.id.clone()))
        } else {
            Box::new(SysfsLine::on_chip(
                args.gpio_root.clone(),
                args.gpio_base,
                spec.pin,
            ))
        }
    })?;

    for door in &config.doors {
        tracing::info!(
            door = %door.id,
            pin = door.pin,
            simulated = args.simulate,
            "door configured"
        );
    }

    let mut state = AppState::new(registry, AuthGate::new(Arc::new(db)));
    if let Some(limit) = args.max_logins {
        state = state.with_verification_limit(usize::from(limit), DEFAULT_VERIFICATION_WAIT);
    }
    tracing::info!(
        max_logins = state.verifications.available_permits(),
        "credential verification limit"
    );
    let assets = if args.dev {
        Assets::Directory(args.static_dir.clone())
    } else {
        Assets::Embedded
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let addr = format!("{}:{}", args.host, args.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;
        zvezda_server::serve_on(listener, state, assets, shutdown_signal()).await
    })
}

fn doors_config(args: &ServeArgs) -> Result<DoorsConfig> {
    let doors = if args.doors.is_empty() {
        DoorsConfig::doors_from_env(|key| std::env::var(key).ok())?
    } else {
        args.doors.clone()
    };
    let timing = DoorTiming::new(
        Duration::from_secs(args.hold_secs),
        Duration::from_secs(args.cooldown_secs),
    )?;
    Ok(DoorsConfig::new(doors, timing)?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested, finishing in-flight requests");
}
