//! ptyhost - diagnostic front end for PTY sessions and local sockets
//!
//! `ptyhost pty` spawns a session and relays stdin/stdout through the PTY.
//! `ptyhost serve` runs a local server that logs every peer and echoes what
//! it sends.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use ptyhost::pty::ExitStatus;
use ptyhost::socket::{ClientHandler, ClientSocket, LocalServer, SocketPath};
use ptyhost::{Config, SessionBuilder, SessionCommand, TerminalGeometry};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("pty") => run_pty(&args[1..]),
        Some("serve") => run_serve(&args[1..]),
        Some("-h") | Some("--help") | None => {
            print_help();
            ExitCode::SUCCESS
        },
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            ExitCode::FAILURE
        },
    }
}

fn load_config(path: Option<&PathBuf>) -> Option<Config> {
    let config = match path {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                return None;
            },
        },
        None => Config::default(),
    };
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return None;
    }
    Some(config)
}

fn run_pty(args: &[String]) -> ExitCode {
    let mut geometry = TerminalGeometry::default();
    let mut failsafe = false;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-f" | "--failsafe" => failsafe = true,
            "-r" | "--rows" => {
                i += 1;
                if i < args.len() {
                    geometry.rows = args[i].parse().unwrap_or(geometry.rows);
                }
            },
            "-c" | "--cols" => {
                i += 1;
                if i < args.len() {
                    geometry.columns = args[i].parse().unwrap_or(geometry.columns);
                }
            },
            "--config" => {
                i += 1;
                config_path = args.get(i).map(PathBuf::from);
            },
            _ => {},
        }
        i += 1;
    }

    let Some(config) = load_config(config_path.as_ref()) else {
        return ExitCode::FAILURE;
    };

    let command = SessionCommand::from_failsafe(failsafe);
    tracing::info!(
        program = %command.program(&config.session).display(),
        rows = geometry.rows,
        cols = geometry.columns,
        "starting session"
    );

    let handle = match SessionBuilder::from_config(&command, &config.session)
        .map(|builder| builder.geometry(geometry))
        .and_then(SessionBuilder::spawn)
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to spawn PTY: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let (mut reader, mut writer) = match (handle.file(), handle.file()) {
        (Ok(reader), Ok(writer)) => (reader, writer),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Failed to open PTY master: {}", e);
            return ExitCode::FAILURE;
        },
    };

    // Detached: a blocked stdin read cannot be interrupted.
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if writer.write_all(&buf[..n]).is_err() {
                        break;
                    }
                },
            }
        }
    });

    let mut stdout = io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if stdout.write_all(&buf[..n]).is_err() {
                    break;
                }
                let _ = stdout.flush();
            },
            // EIO once the last slave descriptor is gone
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("Read error: {}", e);
                break;
            },
        }
    }

    match handle.wait() {
        Ok(status) => {
            tracing::info!(code = status.code(), "session ended");
            exit_code(status)
        },
        Err(e) => {
            tracing::error!("Wait error: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status {
        ExitStatus::Exited(code) => ExitCode::from(code as u8),
        ExitStatus::Signaled(signal) => ExitCode::from((128 + signal) as u8),
    }
}

struct EchoHandler {
    timeout: Duration,
}

impl ClientHandler for EchoHandler {
    fn on_client_accepted(&self, client: ClientSocket) {
        tracing::info!(peer = %client.peer(), cmdline = ?client.peer().cmdline, "client connected");
        let data = match client.read_to_end(self.timeout) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "read failed");
                return;
            },
        };
        if let Err(e) = client.send(&data, self.timeout) {
            tracing::warn!(error = %e, "send failed");
        }
    }
}

fn run_serve(args: &[String]) -> ExitCode {
    let mut path: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).map(PathBuf::from);
            },
            other if path.is_none() => path = Some(other.to_string()),
            _ => {},
        }
        i += 1;
    }

    let Some(path) = path else {
        eprintln!("serve needs a socket path");
        return ExitCode::FAILURE;
    };
    let Some(config) = load_config(config_path.as_ref()) else {
        return ExitCode::FAILURE;
    };

    let socket_path = match path.strip_prefix('@') {
        Some(name) => SocketPath::abstract_name(name.as_bytes()),
        None => SocketPath::from_path(&path),
    };
    let socket_path = match socket_path {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid socket path: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let handler = EchoHandler {
        timeout: Duration::from_millis(u64::from(config.server.read_timeout_ms)),
    };
    let _server = match LocalServer::start(socket_path, &config.server, handler) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start server: {}", e);
            return ExitCode::FAILURE;
        },
    };

    loop {
        thread::park();
    }
}

fn print_help() {
    println!("ptyhost - PTY sessions and local sockets");
    println!();
    println!("Usage:");
    println!("  ptyhost pty [OPTIONS]           Spawn a session and relay stdin/stdout");
    println!("  ptyhost serve <PATH> [OPTIONS]  Serve a local socket (@name for abstract)");
    println!();
    println!("pty options:");
    println!("  -f, --failsafe     Run the failsafe shell instead of the login program");
    println!("  -r, --rows <N>     Terminal height (default: 24)");
    println!("  -c, --cols <N>     Terminal width (default: 80)");
    println!();
    println!("Common options:");
    println!("  --config <FILE>    JSON configuration file");
    println!("  -h, --help         Show this help message");
    println!();
    println!("serve logs each client's credentials and echoes back what it sent");
    println!("once the client shuts down its write side.");
    println!();
    println!("Set RUST_LOG (e.g. RUST_LOG=debug) to control logging.");
}
