use clap::Parser;
use kafka_sink::{Config, Event, KafkaSink, Result};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-sink")]
#[command(about = "Publish newline-delimited JSON events to a Kafka topic", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting kafka-sink");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!(
        topic = %config.producer.topic,
        brokers = ?config.producer.brokers,
        dispatch_mode = ?config.producer.dispatch_mode,
        compression = ?config.producer.compression,
        "Configuration summary"
    );

    let mut sink = KafkaSink::new(config.producer);
    sink.register().await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str(&line) {
                            Ok(value) => sink.receive(Event::Record(value)).await,
                            Err(e) => warn!(error = %e, "Skipping malformed event"),
                        }
                    }
                    Ok(None) => {
                        info!("Input exhausted, shutting down");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read input, shutting down");
                        break;
                    }
                }
            }
        }
    }

    sink.receive(Event::Shutdown).await;
    sink.teardown().await?;

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_sink=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kafka_sink=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
