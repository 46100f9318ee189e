//! PPB Console
//!
//! Connects to one unit through the UDP bridge and runs a list of commands in
//! order, printing each result. `--simulate` runs the same flow against a
//! virtual bridge on loopback.

mod cli;
mod session;
mod settings;

use std::net::IpAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{parse_data, Cli, Step};
use session::{Session, SessionTarget};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "ppb_console=info,ppb_protocol=info,ppb_engine=info,ppb_sim=info".into()
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    apply_overrides(&mut settings, &cli);

    if cli.save {
        let path = settings.save(cli.config.as_deref())?;
        println!("Settings saved to {}", path.display());
    }

    let steps = cli
        .commands
        .iter()
        .map(|name| Step::parse(name))
        .collect::<Result<Vec<_>>>()?;

    let target = SessionTarget {
        ip: settings
            .bridge_ip
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid bridge IP {:?}", settings.bridge_ip))?,
        port: settings.bridge_port,
        address: settings.address.parse()?,
        period: settings.period,
        data: parse_data(&cli.data)?,
    };

    let mut session =
        Session::start(settings.engine.clone(), target, cli.simulate, cli.traffic).await?;
    let outcome = run_steps(&mut session, &steps).await;
    session.finish().await?;

    let failed = outcome?;
    if failed > 0 {
        anyhow::bail!("{} of {} command(s) failed", failed, steps.len());
    }
    Ok(())
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(ip) = cli.ip {
        settings.bridge_ip = ip.to_string();
    }
    if let Some(port) = cli.port {
        settings.bridge_port = port;
    }
    if let Some(address) = cli.address {
        settings.address = address.to_string();
    }
    if let Some(period) = cli.period {
        settings.period = period;
    }
}

async fn run_steps(session: &mut Session, steps: &[Step]) -> Result<usize> {
    session.connect().await?;

    let mut failed = 0;
    for step in steps {
        if !session.run(*step).await? {
            failed += 1;
        }
    }
    Ok(failed)
}
