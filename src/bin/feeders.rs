//! command line access to the feeders of a machine, through its motion controller's serial port

use std::path::PathBuf;
use clap::{Parser, Subcommand};
use log::*;

use smartfeeder::{
    bus::GcodeTransport,
    config::MachineConfig,
    packet::HardwareId,
    registry::FeederId,
    Controller, Error,
    };


#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// serial port of the motion controller
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: PathBuf,
    /// baud rate of the serial port
    #[arg(short, long, default_value = "115200")]
    rate: u32,
    /// machine configuration, created if missing
    #[arg(short, long, default_value = "feeders.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// search feeders on every address and record them in the configuration
    Scan,
    /// list configured feeders
    List,
    /// find and initialize a feeder
    Prepare { hardware_id: HardwareId },
    /// advance a feeder by one part
    Feed { hardware_id: HardwareId },
    /// firmware protocol version of a feeder
    Version { hardware_id: HardwareId },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = if args.config.exists() {
        MachineConfig::load(&args.config)?
    } else {
        info!("no configuration at {}, starting empty", args.config.display());
        MachineConfig::default()
    };
    let transport = GcodeTransport::open(&args.port, args.rate)?;
    let controller = Controller::from_config(transport, &config)?;

    match args.command {
        Command::Scan => {
            let created = controller.find_all_feeders(|progress| {
                if let Some(hardware_id) = progress.found {
                    info!("{:3}%  address {}: {}", progress.percent, progress.address, hardware_id);
                }
            }).await?;
            info!("{} feeders found, {} of them new", controller.registry().ids().iter()
                .filter(|&&id| controller.registry().get(id).is_ok_and(|feeder| feeder.slot_address().is_some()))
                .count(),
                created.len());
        },
        Command::List => {
            for (_, feeder) in controller.registry().feeders() {
                println!("{}  {:?}  {}",
                    feeder.hardware_id().map_or_else(|| String::from("-"), |id| id.to_string()),
                    feeder.issues(&**controller.slots()),
                    feeder.name());
            }
        },
        Command::Prepare { hardware_id } => {
            let id = known(&controller, hardware_id)?;
            controller.prepare_for_job(id).await?;
            info!("{} ready", controller.registry().get(id)?.name());
        },
        Command::Feed { hardware_id } => {
            let id = known(&controller, hardware_id)?;
            controller.feed(id).await?;
            info!("next part of {} at {:?}", controller.registry().get(id)?.name(), controller.pick_location(id).ok());
        },
        Command::Version { hardware_id } => {
            let id = known(&controller, hardware_id)?;
            println!("{}", controller.version(id).await?);
        },
    }

    controller.snapshot().save(&args.config)?;
    Ok(())
}

/// feeder with the given hardware id, creating it if never configured
fn known(controller: &Controller<GcodeTransport>, hardware_id: HardwareId) -> Result<FeederId, Error> {
    let (id, created) = controller.registry().resolve(hardware_id, false)?;
    if created {
        warn!("feeder {} was not configured yet", hardware_id);
    }
    Ok(id)
}
