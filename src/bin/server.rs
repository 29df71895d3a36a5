//! Courier Server Binary
//!
//! Starts an echo server: every message is answered with `echo:<message>`,
//! `exit` drops the connection. Type `quit` on stdin to stop.

use std::io::BufRead;
use std::path::PathBuf;

use clap::Parser;
use courier::logging::FileLog;
use courier::network::{ClientHandler, Server, Session};
use courier::{Config, Result, Separator};

/// Courier Server
#[derive(Parser, Debug)]
#[command(name = "courier-server")]
#[command(about = "Separator-delimited TCP echo server")]
#[command(version)]
struct Args {
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(short, long, default_value = "6380")]
    port: u16,

    /// Maximum simultaneously connected clients
    #[arg(short, long, default_value = "8")]
    max_connections: usize,

    /// Message separator (exactly one character)
    #[arg(short, long, default_value = "+")]
    separator: Separator,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Filter directives for the log file
    #[arg(long, default_value = "debug")]
    log_file_filter: String,
}

/// Answers every message and honours `exit`
struct EchoSession;

impl Session for EchoSession {
    fn update(&mut self, handler: &mut ClientHandler) -> Result<()> {
        let report = handler.update()?;

        for message in handler.drain_messages() {
            tracing::debug!("{} says {:?}", handler.peer_addr(), message);
            if message == "exit" {
                handler.exit()?;
                return Ok(());
            }
            handler.send(&format!("echo:{}", message))?;
        }

        if report.peer_closed {
            handler.exit()?;
        }
        Ok(())
    }

    fn on_close(&mut self, handler: &mut ClientHandler) {
        tracing::info!("{} disconnected", handler.peer_addr());
    }
}

fn main() {
    let args = Args::parse();

    let file_log = args.log_file.as_deref().map(|path| FileLog {
        path,
        filter: &args.log_file_filter,
    });
    if let Err(e) = courier::logging::init_tracing("info", file_log) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing::info!("Courier Server v{}", courier::VERSION);

    let config = Config::builder()
        .host(&args.host)
        .port(args.port)
        .max_connections(args.max_connections)
        .separator(args.separator)
        .build();

    let server = match Server::bind(config, |_: &ClientHandler| EchoSession) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    let handle = match server.spawn() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start server thread: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on {}; type `quit` to stop", handle.local_addr());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim() == "quit" => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("stdin error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = handle.stop() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
