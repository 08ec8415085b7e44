use clap::{Parser, Subcommand};
use pperf::measurements::format_bytes;
use pperf::{Client, Config, Server, Stats};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pperf")]
#[command(about = "Point-to-point TCP throughput tester", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in server mode
    Server {
        /// Port to listen on
        #[arg(short, long, default_value = "5201")]
        port: u16,

        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<String>,

        /// Bind to a network interface (Linux only)
        #[arg(short, long)]
        interface: Option<String>,

        /// Largest frame accepted, in bytes
        #[arg(short = 'l', long, default_value = "131072")]
        length: usize,

        /// Seconds to wait for a frame before dropping a stalled client
        #[arg(long, default_value = "10")]
        read_timeout: u64,
    },

    /// Run in client mode
    Client {
        /// Server address to connect to
        server: String,

        /// Port to connect to
        #[arg(short, long, default_value = "5201")]
        port: u16,

        /// Test duration in seconds
        #[arg(short = 't', long, default_value = "10")]
        time: u64,

        /// Bind to a network interface (Linux only)
        #[arg(short, long)]
        interface: Option<String>,

        /// Frame size in bytes, header included
        #[arg(short = 'l', long, default_value = "131072")]
        length: usize,

        /// Seconds between pings for server-side totals
        #[arg(long, default_value = "1")]
        ping: u64,

        /// Output in JSON format
        #[arg(short = 'J', long)]
        json: bool,
    },
}

fn print_stats(label: &str, stats: &Stats) {
    let (value, unit) = format_bytes(stats.total_bytes);
    println!(
        "{:<9} {:6.2} {:>6}  {:6.2} sec  {:8.2} Mbits/sec",
        label,
        value,
        unit,
        stats.elapsed_milliseconds as f64 / 1000.0,
        stats.mbits_per_second
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            bind,
            interface,
            length,
            read_timeout,
        } => {
            let mut config = Config::server(port)
                .with_block_size(length)
                .with_read_timeout(Duration::from_secs(read_timeout));

            if let Some(bind_addr) = bind {
                config = config.with_bind_addr(bind_addr.parse()?);
            }
            if let Some(interface) = interface {
                config = config.with_interface(interface);
            }

            let server = Server::new(config);
            server.run().await?;
        }

        Commands::Client {
            server,
            port,
            time,
            interface,
            length,
            ping,
            json,
        } => {
            let mut config = Config::client(server, port)
                .with_duration(Duration::from_secs(time))
                .with_block_size(length)
                .with_ping_interval(Duration::from_secs(ping))
                .with_json(json);

            if let Some(interface) = interface {
                config = config.with_interface(interface);
            }

            let client = Client::new(config)?;
            let results = client.run().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("- - - - - - - - - - - - - - - - - - - - - - - - -");
                println!("Peer {}", results.address);
                print_stats("upload", &results.upload);
                print_stats("download", &results.download);
            }
        }
    }

    Ok(())
}
