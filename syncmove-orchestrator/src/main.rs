// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use clap::{Parser, ValueHint};

use syncmove::{
    channel::UdpLink,
    controller::Rig,
    engine::Orchestrator,
    stream::{ManualInput, PointSource, SineWave},
    OperationProfile, SourceKind,
};

#[derive(Parser)]
#[command(author = "Copyright (C) 2024 Laixer Equipment B.V.")]
#[command(version, propagate_version = true)]
#[command(about = "Syncmove orchestrator", long_about = None)]
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
    /// Operation profile, by menu number or name.
    #[arg(short, long)]
    profile: Option<String>,
    /// Path name.
    #[arg(long)]
    path: Option<String>,
    /// Read joint targets from stdin.
    #[arg(long)]
    manual: bool,
    /// Quiet output (no logging).
    #[arg(long)]
    quiet: bool,
    /// Level of verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Commands.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Select controller modes and run the sequence.
    Run,
    /// Select controller modes and stream joint targets to MultiMove.
    Stream {
        /// Number of points, zero streams until quit.
        #[arg(short, long)]
        budget: Option<usize>,
    },
    /// Terminate both controller processes.
    Terminate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    syncmove::logger::init(args.verbose, args.quiet, false)?;

    let mut config = syncmove::Config::load(args.config.as_deref())?;

    if let Some(profile) = args.profile {
        config.orchestrator.profile = OperationProfile::from_choice(&profile);
    }
    if let Some(path) = args.path {
        config.orchestrator.path = path;
    }
    if args.manual {
        config.stream.source = SourceKind::Manual;
    }

    log::trace!("{:#?}", config);

    let table = config.motion_table();
    let path = table
        .path_code(&config.orchestrator.path)
        .ok_or_else(|| anyhow::anyhow!("unknown path: {}", config.orchestrator.path))?;

    let multimove = config.endpoints(Rig::MultiMove);
    let cobot = config.endpoints(Rig::Cobot);

    let multimove = UdpLink::bind(multimove.feedback.as_str(), multimove.command.as_str()).await?;
    let cobot = UdpLink::bind(cobot.feedback.as_str(), cobot.command.as_str()).await?;

    let runtime = syncmove::RuntimeContext::new();
    runtime.enable_termination_signal();

    let mut orchestrator = Orchestrator::new(
        multimove,
        cobot,
        config.engine_settings(),
        runtime.shutdown_signal(),
    )
    .with_table(table)
    .with_path(path);

    let mut source: Box<dyn PointSource> = match config.stream.source {
        SourceKind::Sine => Box::new(SineWave::default()),
        SourceKind::Manual => Box::new(ManualInput::stdin()),
    };

    match args.command {
        Command::Run => {
            let profile = config.orchestrator.profile;

            log::info!("Operation profile: {}", profile);

            let result = match orchestrator.handshake(profile.modes()).await {
                Ok(()) => orchestrator.run(config.sequence(), source.as_mut()).await,
                Err(e) => Err(e),
            };

            orchestrator.terminate().await?;

            log::info!("{}", result?);
        }
        Command::Stream { budget } => {
            let profile = config.orchestrator.profile;
            let budget = budget.unwrap_or(config.stream.budget);

            log::info!("Operation profile: {}", profile);

            let result = match orchestrator.handshake(profile.modes()).await {
                Ok(()) => orchestrator.stream(budget, source.as_mut()).await,
                Err(e) => Err(e),
            };

            orchestrator.terminate().await?;

            log::info!("{}", result?);
        }
        Command::Terminate => orchestrator.terminate().await?,
    }

    Ok(())
}
