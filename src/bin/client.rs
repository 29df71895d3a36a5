//! Courier CLI Client
//!
//! Command-line interface for talking to a Courier server.

use std::io::BufRead;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::{Parser, Subcommand};
use courier::network::{Client, ClientHandle, Connection};
use courier::{Config, Separator};

/// Courier CLI
#[derive(Parser, Debug)]
#[command(name = "courier-client")]
#[command(about = "CLI for a Courier server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6380")]
    port: u16,

    /// Message separator (exactly one character)
    #[arg(short, long, default_value = "+")]
    separator: Separator,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send messages and print the replies
    Send {
        /// Messages to send, in order
        #[arg(required = true)]
        messages: Vec<String>,

        /// How long to wait for replies (milliseconds)
        #[arg(short, long, default_value = "500")]
        wait_ms: u64,
    },

    /// Send each stdin line as a message and print replies as they arrive
    Chat,
}

fn main() {
    if let Err(e) = courier::logging::init_tracing("warn", None) {
        eprintln!("{}", e);
    }

    let args = Args::parse();

    let config = Config::builder()
        .host(&args.host)
        .port(args.port)
        .separator(args.separator)
        .build();

    let handle = match Client::connect(config).and_then(Client::spawn_default) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    let mut printer = None;
    let outcome = match args.command {
        Commands::Send { messages, wait_ms } => send(&handle, &messages, Duration::from_millis(wait_ms)),
        Commands::Chat => {
            printer = Some(spawn_printer(Arc::clone(handle.connection())));
            chat(&handle)
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
    }
    let closed = handle.close_and_join();

    // The connection is closed now, so the printer drains what is left and stops
    if let Some(printer) = printer {
        if printer.join().is_err() {
            eprintln!("Error: printer thread panicked");
        }
    }
    if let Err(e) = closed {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn send(handle: &ClientHandle, messages: &[String], wait: Duration) -> courier::Result<()> {
    for message in messages {
        handle.send(message)?;
    }
    while let Some(reply) = handle.next_message_timeout(wait) {
        println!("{}", reply);
    }
    Ok(())
}

/// Print replies until the connection is closed and its queue is empty
fn spawn_printer(connection: Arc<Connection>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match connection.next_message_timeout(Duration::from_millis(100)) {
            Some(reply) => println!("{}", reply),
            None if connection.is_closed() => break,
            None => {}
        }
    })
}

fn chat(handle: &ClientHandle) -> courier::Result<()> {
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        handle.send(&line)?;
    }
    Ok(())
}
