#![forbid(unsafe_code)]

//! `attach-shell-ctl` — client for a running `attach-shell` host.
//!
//! Reads the discovery record, refuses to connect when the shell is
//! disabled, sends the handshake header, and then either pipes the terminal
//! through the connection or prints a single `--eval` result.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpStream};
use std::path::PathBuf;

use clap::Parser;

use attach_shell::shell::discovery::DiscoveryRecord;
use attach_shell::shell::handshake::{EvaluateAndExit, HandshakeRequest};

#[derive(Debug, Parser)]
#[command(
    name = "attach-shell-ctl",
    about = "Attach to a running attach-shell host",
    version,
    long_about = None
)]
struct Cli {
    /// Directory holding the host's discovery record.
    #[arg(long)]
    shell_dir: Option<PathBuf>,

    /// Address the host listens on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Evaluate one command, print its result, and exit.
    #[arg(long)]
    eval: Option<String>,

    /// Origin name reported for `--eval`.
    #[arg(long, requires = "eval")]
    filename: Option<String>,

    /// Prompt to use instead of the host default.
    #[arg(long)]
    prompt: Option<String>,

    /// Disable ANSI colors in rendered results.
    #[arg(long)]
    no_colors: bool,
}

fn main() {
    let args = Cli::parse();
    let shell_dir = args
        .shell_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("attach-shell"));

    let (port, key) = match DiscoveryRecord::load(&shell_dir) {
        DiscoveryRecord::Enabled { port, key } => (port, key),
        DiscoveryRecord::Disabled { reason } => {
            eprintln!("Shell is not available: {reason}");
            std::process::exit(1);
        }
    };

    let request = HandshakeRequest {
        key: Some(key.into()),
        columns: Some(terminal_columns().into()),
        evaluate_and_exit: args.eval.clone().map(|command| EvaluateAndExit {
            command,
            filename: args.filename.clone(),
        }),
        prompt: args.prompt.clone(),
        use_colors: args.no_colors.then_some(false),
        ..HandshakeRequest::default()
    };

    let stream = match connect(args.host, port, &request) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("Failed to connect to shell on port {port}: {err}");
            std::process::exit(1);
        }
    };

    let outcome: std::result::Result<i32, Box<dyn std::error::Error>> =
        if request.evaluate_and_exit.is_some() {
            one_shot(&stream)
        } else {
            interactive(stream).map(|()| 0).map_err(Into::into)
        };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Shell connection failed: {err}");
            std::process::exit(1);
        }
    }
}

fn terminal_columns() -> u32 {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(80)
}

/// Open the connection and send the handshake header line.
fn connect(
    host: IpAddr,
    port: u16,
    request: &HandshakeRequest,
) -> std::result::Result<TcpStream, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect((host, port))?;

    let mut header = serde_json::to_string(request)?;
    header.push('\n');
    stream.write_all(header.as_bytes())?;
    stream.flush()?;

    Ok(stream)
}

/// Read the single reply line and report it. Returns the exit code.
fn one_shot(stream: &TcpStream) -> std::result::Result<i32, Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let Ok(reply) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
        eprintln!("{}", line.trim());
        return Ok(1);
    };

    if let Some(error) = reply.get("error") {
        eprintln!("{}", error.as_str().unwrap_or("unknown error"));
        return Ok(1);
    }

    match reply.get("result") {
        Some(serde_json::Value::String(text)) => println!("{text}"),
        Some(value) => println!("{value}"),
        None => println!("undefined"),
    }
    Ok(0)
}

/// Pipe stdin to the shell and the shell to stdout until either side closes.
fn interactive(stream: TcpStream) -> io::Result<()> {
    let mut upstream = stream.try_clone()?;

    std::thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0_u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if upstream.write_all(&buf[..n]).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = upstream.shutdown(Shutdown::Write);
    });

    let mut downstream = stream;
    let mut stdout = io::stdout().lock();
    io::copy(&mut downstream, &mut stdout)?;
    stdout.flush()
}
