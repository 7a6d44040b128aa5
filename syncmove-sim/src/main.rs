// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::time::Duration;

use clap::Parser;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use syncmove::adapter::{CommandTag, RobotResponse, REACCEPT_PREFIX};

mod config;

#[derive(Parser)]
#[command(author = "Copyright (C) 2024 Laixer Equipment B.V.")]
#[command(version, propagate_version = true)]
#[command(about = "Syncmove Robot Controller Simulator", long_about = None)]
struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value = syncmove::consts::DEFAULT_MULTIMOVE_VIRTUAL)]
    listen: String,
    /// Discrete move duration in milliseconds.
    #[arg(long, default_value_t = 500)]
    motion_time: u64,
    /// Joint stream move duration in milliseconds.
    #[arg(long, default_value_t = 50)]
    stream_time: u64,
    /// Randomize motion durations.
    #[arg(long)]
    jitter: bool,
    /// Greet reconnecting clients with the re-accept banner.
    #[arg(long)]
    reaccept: bool,
    /// Daemonize the service.
    #[arg(long)]
    daemon: bool,
    /// Level of verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::SimConfig {
        listen: args.listen,
        motion_time: args.motion_time,
        stream_time: args.stream_time,
        jitter: args.jitter,
        reaccept: args.reaccept,
    };

    syncmove::logger::init(args.verbose, false, args.daemon)?;

    if args.daemon {
        log::debug!("Running service as daemon");
    }

    log::trace!("{:#?}", config);

    daemonize(config).await
}

/// Command received from a client.
#[derive(Debug, PartialEq)]
struct SimCommand {
    tag: CommandTag,
    values: Vec<f64>,
}

/// Split client input into commands.
///
/// Input may hold several commands back to back. Values that do not parse
/// are dropped.
fn parse_commands(input: &str) -> Vec<SimCommand> {
    let mut starts = Vec::new();
    for (index, _) in input.char_indices() {
        if let Some(tag) = input.get(index..index + 2).and_then(CommandTag::from_tag) {
            starts.push((index, tag));
        }
    }

    let mut commands = Vec::new();
    for (i, (start, tag)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(input.len(), |(next, _)| *next);

        let values = input[start + 2..end]
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse::<f64>().ok())
            .collect();

        commands.push(SimCommand { tag: *tag, values });
    }

    commands
}

/// Robot pose after moving to the commanded target.
fn pose_after(values: &[f64]) -> [f64; 5] {
    let mut pose = [0.0; 5];
    for (axis, value) in pose.iter_mut().zip(values) {
        *axis = *value;
    }
    pose
}

fn motion_delay(base: u64, jitter: bool) -> Duration {
    use rand::Rng;

    let mut rng = rand::rngs::OsRng::default();

    if jitter && base > 0 {
        Duration::from_millis(base + rng.gen_range(0..=base / 5))
    } else {
        Duration::from_millis(base)
    }
}

async fn serve_client(
    mut stream: TcpStream,
    address: std::net::SocketAddr,
    config: config::SimConfig,
) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let mut banner = config.reaccept;

    loop {
        let size = stream.read(&mut buffer).await?;
        if size == 0 {
            log::info!("Client {} disconnected", address);
            return Ok(());
        }

        let input = String::from_utf8_lossy(&buffer[..size]).to_string();

        for command in parse_commands(&input) {
            log::debug!("{} » {} {:?}", address, command.tag, command.values);

            let response = match command.tag {
                CommandTag::Init => RobotResponse::new([RobotResponse::STATUS_READY, 0.0, 0.0, 0.0, 0.0, 0.0]),
                CommandTag::DiscreteMove | CommandTag::JointStream => {
                    let base = if command.tag == CommandTag::DiscreteMove {
                        config.motion_time
                    } else {
                        config.stream_time
                    };

                    tokio::time::sleep(motion_delay(base, config.jitter)).await;

                    let pose = pose_after(&command.values);
                    RobotResponse::new([
                        RobotResponse::STATUS_MOTION_COMPLETE,
                        pose[0],
                        pose[1],
                        pose[2],
                        pose[3],
                        pose[4],
                    ])
                }
                CommandTag::Terminate => {
                    log::info!("Client {} terminated session", address);
                    stream.shutdown().await.ok();
                    return Ok(());
                }
            };

            let mut reply = response.to_wire();
            if banner {
                reply = format!("{} {}", REACCEPT_PREFIX, reply);
                banner = false;
            }

            log::debug!("{} « {}", address, reply);

            stream.write_all(reply.as_bytes()).await?;
        }
    }
}

async fn listener(config: config::SimConfig) {
    let listener = match TcpListener::bind(&config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to listen on {}: {}", config.listen, e);
            return;
        }
    };

    log::info!("Listening on: {}", config.listen);

    loop {
        let (stream, address) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                log::error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        log::info!("Accepted connection from: {}", address);

        stream.set_nodelay(true).ok();

        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_client(stream, address, config).await {
                log::warn!("Client {} failed: {}", address, e);
            }
        });
    }
}

async fn daemonize(config: config::SimConfig) -> anyhow::Result<()> {
    let runtime = syncmove::RuntimeContext::new();
    runtime.enable_termination_signal();

    runtime.spawn_background_task(listener(config));

    runtime.wait_for_shutdown().await;

    Ok(())
}
