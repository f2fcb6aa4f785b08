//! Command-line surface. One flat `Args` struct covers
//! both sender and receiver, since mode is inferred from whether `-s`
//! was supplied rather than a clap subcommand split.

use clap::{CommandFactory, Parser};

#[derive(Debug, Parser)]
#[command(name = "rft", about = "Reliable file transfer over an unreliable datagram service")]
pub struct Args {
    /// Local UDP port to bind.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Remote host; presence of this flag selects sender mode.
    #[arg(short = 's', long = "server")]
    pub remote_host: Option<String>,

    /// Remote port (sender mode only).
    #[arg(short = 'a', long = "remote-port")]
    pub remote_port: Option<u16>,

    /// Sender: file to read and send. Receiver: file to write.
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Maximum payload size per packet, in bytes.
    #[arg(short = 'm', long = "mtu")]
    pub mtu: Option<u32>,

    /// Sliding window size, in packets.
    #[arg(short = 'c', long = "window")]
    pub window: Option<u32>,
}

pub enum Mode {
    Sender { remote_host: String, remote_port: u16 },
    Receiver,
}

pub struct Validated {
    pub port: u16,
    pub file: String,
    pub mtu: u32,
    pub window: u32,
    pub mode: Mode,
}

impl Args {
    /// Enforces the required-combination table: `-p -m -c -f` always,
    /// `-s -a` as well once sender mode is inferred from `-s`. Prints a
    /// clap-style usage error to stderr and exits non-zero on violation,
    /// rather than returning, since there is no sane fallback value for a
    /// missing required flag.
    pub fn validate(self) -> Validated {
        let missing = |flag: &str| -> ! {
            let mut cmd = Args::command();
            cmd.error(clap::error::ErrorKind::MissingRequiredArgument, format!("the argument '{flag}' is required"))
                .exit();
        };

        let port = self.port.unwrap_or_else(|| missing("-p <PORT>"));
        let mtu = self.mtu.unwrap_or_else(|| missing("-m <MTU>"));
        let window = self.window.unwrap_or_else(|| missing("-c <WINDOW>"));
        let file = self.file.unwrap_or_else(|| missing("-f <FILE>"));

        let mode = match self.remote_host {
            Some(remote_host) => {
                let remote_port = self.remote_port.unwrap_or_else(|| missing("-a <REMOTE_PORT>"));
                Mode::Sender { remote_host, remote_port }
            }
            None => Mode::Receiver,
        };

        Validated { port, file, mtu, window, mode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_mode_inferred_without_server_flag() {
        let args = Args {
            port: Some(9000),
            remote_host: None,
            remote_port: None,
            file: Some("out.bin".into()),
            mtu: Some(1400),
            window: Some(8),
        };
        let v = args.validate();
        assert!(matches!(v.mode, Mode::Receiver));
        assert_eq!(v.port, 9000);
    }

    #[test]
    fn sender_mode_inferred_from_server_flag() {
        let args = Args {
            port: Some(9001),
            remote_host: Some("127.0.0.1".into()),
            remote_port: Some(9000),
            file: Some("in.bin".into()),
            mtu: Some(1400),
            window: Some(8),
        };
        let v = args.validate();
        match v.mode {
            Mode::Sender { remote_host, remote_port } => {
                assert_eq!(remote_host, "127.0.0.1");
                assert_eq!(remote_port, 9000);
            }
            Mode::Receiver => panic!("expected sender mode"),
        }
    }
}
