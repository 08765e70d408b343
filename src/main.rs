use clap::{Arg, Command};
use log::LevelFilter;
use mailtrail::config::Config;
use mailtrail::sink;
use mailtrail::{EventServer, SmtpTracker};
use std::fs::File;
use std::io::BufReader;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("mailtrail")
        .version(env!("CARGO_PKG_VERSION"))
        .about("SMTP session analyzer: per-message records, relay paths and block list notices")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/mailtrail.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .value_name("FILE")
                .help("Process a JSON-lines event capture instead of listening on the socket")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("socket")
                .short('s')
                .long("socket")
                .value_name("PATH")
                .help("Override the configured event socket path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Initialize logger based on verbose flag
    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/mailtrail.yaml");

    let mut config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if let Some(socket) = matches.get_one::<String>("socket") {
        config.socket_path = socket.clone();
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let tracker = match build_tracker(&config) {
        Ok(tracker) => tracker,
        Err(e) => {
            log::error!("Failed to create tracker: {e:#}");
            process::exit(1);
        }
    };

    if let Some(capture) = matches.get_one::<String>("replay") {
        replay_capture(tracker, capture);
        return;
    }

    log::info!("Starting mailtrail...");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {e}");
        }
    };
    match EventServer::new(tracker)
        .run(&config.socket_path, shutdown)
        .await
    {
        Ok(stats) => log::debug!("Final statistics: {stats:?}"),
        Err(e) => {
            log::error!("Event server error: {e:#}");
            process::exit(1);
        }
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("Testing configuration...");
    println!("Socket path: {}", config.socket_path);
    println!("Monitored ports: {:?}", config.ports);
    println!("Path capture: {:?}", config.mail_path_capture);
    println!("Local networks: {}", config.site.local_nets.len());
    match config.signatures() {
        Ok(signatures) => {
            println!("Block list patterns: {}", signatures.patterns().len());
            println!("All regex patterns compiled successfully.");
        }
        Err(e) => {
            println!("Configuration validation failed:");
            println!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn build_tracker(config: &Config) -> anyhow::Result<SmtpTracker> {
    let records = sink::record_sink(config.output.record_log.as_deref())?;
    let notices = sink::notice_sink(config.output.notice_log.as_deref())?;
    SmtpTracker::new(config, records, notices)
}

fn replay_capture(mut tracker: SmtpTracker, path: &str) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::error!("Failed to open capture {path}: {e}");
            process::exit(1);
        }
    };

    match tracker.replay(BufReader::new(file)) {
        Ok(count) => log::info!("Replayed {count} events from {path}"),
        Err(e) => {
            log::error!("Failed to read capture {path}: {e}");
            tracker.shutdown();
            process::exit(1);
        }
    }
    tracker.shutdown();
}
