// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use clap::{Parser, ValueHint};

use syncmove::{
    adapter::TcpConnector,
    channel::UdpLink,
    controller::{ControllerProcess, Rig},
};

#[derive(Parser)]
#[command(author = "Copyright (C) 2024 Laixer Equipment B.V.")]
#[command(version, propagate_version = true)]
#[command(about = "Syncmove controller process daemon", long_about = None)]
struct Args {
    /// Configuration file.
    #[arg(
        short = 'c',
        long = "config",
        alias = "conf",
        value_name = "FILE",
        value_hint = ValueHint::FilePath
    )]
    config: Option<std::path::PathBuf>,
    /// Robot rig served by this process.
    #[arg(short, long, value_name = "RIG")]
    rig: Rig,
    /// Quiet output (no logging).
    #[arg(long)]
    quiet: bool,
    /// Daemonize the service.
    #[arg(short = 'D', long)]
    daemon: bool,
    /// Level of verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    syncmove::logger::init(args.verbose, args.quiet, args.daemon)?;

    if args.daemon {
        log::debug!("Running service as daemon");
    }

    let config = syncmove::Config::load(args.config.as_deref())?;

    log::trace!("{:#?}", config);

    let endpoints = config.endpoints(args.rig);

    log::info!(
        "Starting {} controller process on {}",
        args.rig,
        endpoints.command
    );

    let link = UdpLink::bind(endpoints.command.as_str(), endpoints.feedback.as_str()).await?;

    let runtime = syncmove::RuntimeContext::new();
    runtime.enable_termination_signal();

    let mut process = ControllerProcess::new(
        args.rig,
        link,
        TcpConnector,
        config.motion_table(),
        config.controller_settings(args.rig),
        runtime.shutdown_signal(),
    );

    process.run().await?;

    Ok(())
}
