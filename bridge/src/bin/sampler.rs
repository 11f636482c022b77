// Raw sample stream tool for probing transport latency and robustness.
// Modes mirror the reference harness: w/r connect to an existing pipe,
// ww/rr create one and wait for a peer.

use log::{error, info};
use pipebridge::sampler::{SampleConsumer, SampleProducer};
use pipebridge::{logging, ConnectOptions, PipeName, Role};
use std::path::PathBuf;

fn usage() -> ! {
    eprintln!("usage: pipebridge-sampler <w|r|ww|rr> <pipe-name> [pipe-dir]");
    eprintln!("  w   write samples as client   r   read samples as client");
    eprintln!("  ww  write samples as server   rr  read samples as server");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    logging::init_logger();

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| usage());
    let name = args.next().unwrap_or_else(|| usage());
    let dir = args.next().unwrap_or_else(|| "/tmp".to_string());

    let pipe = PipeName::new(name, PathBuf::from(dir));
    let options = ConnectOptions::default();

    info!("[SAMPLER] Mode '{}' on pipe '{}'", mode, pipe);
    match mode.as_str() {
        "w" => SampleProducer::new(pipe, Role::Client, options).run().await,
        "ww" => SampleProducer::new(pipe, Role::Server, options).run().await,
        "r" => {
            SampleConsumer::new(pipe, Role::Client, options)
                .run(|value| println!("{}", value))
                .await
        }
        "rr" => {
            SampleConsumer::new(pipe, Role::Server, options)
                .run(|value| println!("{}", value))
                .await
        }
        other => {
            error!("[SAMPLER] Unknown mode '{}'", other);
            usage();
        }
    }
}
