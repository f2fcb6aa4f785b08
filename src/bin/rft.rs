use std::fs::File;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use rft::cli::{Args, Mode};
use rft::{Config, MonotonicClock, Receiver, Sender, UdpTransport};

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse().validate();

    let config = match Config::new(args.mtu, args.window) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.mode {
        Mode::Sender { remote_host, remote_port } => run_sender(args.port, &remote_host, remote_port, &args.file, config),
        Mode::Receiver => run_receiver(args.port, &args.file, config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_sender(local_port: u16, remote_host: &str, remote_port: u16, file: &str, config: Config) -> rft::Result<()> {
    let transport = UdpTransport::bind(local_port).map_err(rft::Error::Transport)?;
    let peer_addr = resolve(remote_host, remote_port)?;
    let reader = File::open(file).map_err(rft::Error::File)?;
    let clock: Arc<dyn rft::Clock> = Arc::new(MonotonicClock::new());

    let sender = Sender::new(transport, peer_addr, reader, config, clock);
    sender.run()
}

fn run_receiver(local_port: u16, file: &str, config: Config) -> rft::Result<()> {
    let transport = UdpTransport::bind(local_port).map_err(rft::Error::Transport)?;
    let out = File::create(file).map_err(rft::Error::File)?;

    let mut receiver = Receiver::new(transport, out, config);
    receiver.run()
}

fn resolve(host: &str, port: u16) -> rft::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| rft::Error::Config(format!("cannot resolve {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| rft::Error::Config(format!("no address found for {host}:{port}")))
}
