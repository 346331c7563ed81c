//! Command line client for the LED strip daemon.
//!
//! Sends one raw command over the control socket and prints the reply.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a command to the LED strip daemon
#[derive(Parser)]
#[command(name = "ledstrip-cli", version = VERSION, about)]
struct Cli {
    /// Raw command, e.g. "progress:40", or "?" for a status snapshot
    command: Option<String>,

    /// Control socket path
    #[arg(short, long, default_value = "/var/run/ledstripd.sock")]
    socket: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("ledstripd v{VERSION}");
        return ExitCode::SUCCESS;
    };

    let mut stream = match UnixStream::connect(&cli.socket) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("socket error: {err}");
            eprintln!(
                "Unable to connect to {}. Daemon running?",
                cli.socket.display()
            );
            return ExitCode::FAILURE;
        }
    };

    println!("> {command}");
    match exchange(&mut stream, &command) {
        Ok(response) => {
            println!("< {response}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("socket error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn exchange(stream: &mut UnixStream, command: &str) -> io::Result<String> {
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;
    stream.write_all(command.as_bytes())?;
    stream.write_all(b"\n")?;

    // Response ends at the NUL terminator or on close.
    let mut response = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        if let Some(pos) = chunk[..n].iter().position(|b| *b == 0) {
            response.extend_from_slice(&chunk[..pos]);
            break;
        }
        response.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}
