use chatmail_milter::config::DEFAULT_CONFIG_PATH;
use chatmail_milter::{Config, ListenUri, Message, Milter, PolicyConfig, PolicyEngine, Session};
use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("chatmail-milter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Milter rejecting unencrypted mail leaving a chatmail server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("URI")
                .help("Listen address, e.g. unix:///run/milter.sock or tcp://127.0.0.1:10025")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("domain")
                .long("domain")
                .value_name("FQDN")
                .help("Mail domain written by --generate-config")
                .requires("generate-config")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-email")
                .long("test-email")
                .value_name("FILE")
                .help("Check a message file against the encryption policy")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("mail-from")
                .long("mail-from")
                .value_name("ADDR")
                .help("Envelope sender for --test-email (default: From header)")
                .requires("test-email")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("rcpt")
                .long("rcpt")
                .value_name("ADDR")
                .help("Envelope recipient for --test-email, repeatable (default: To header)")
                .requires("test-email")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        let domain = matches
            .get_one::<String>("domain")
            .map(String::as_str)
            .unwrap_or("chat.example.org");
        generate_default_config(generate_path, domain);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    let mut config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if let Some(listen) = matches.get_one::<String>("listen") {
        if let Err(e) = config.set_milter_listen(listen) {
            eprintln!("Invalid listen address: {e}");
            process::exit(1);
        }
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let policy = Arc::new(PolicyConfig::from(&config));

    if let Some(email_file) = matches.get_one::<String>("test-email") {
        let mail_from = matches.get_one::<String>("mail-from").cloned();
        let rcpts: Vec<String> = matches
            .get_many::<String>("rcpt")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        test_email_file(policy, email_file, mail_from, rcpts);
        return;
    }

    let listen_uri = match ListenUri::parse(&config.milter_listen) {
        Ok(uri) => uri,
        Err(e) => {
            eprintln!("Invalid listen address: {e}");
            process::exit(1);
        }
    };

    let listener = match listen_uri.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to listen on {listen_uri}: {e}");
            process::exit(1);
        }
    };

    log::info!(
        "Starting chatmail milter for {} on {}",
        config.mail_fully_qualified_domain_name,
        listen_uri
    );

    let milter = Milter::new(policy);
    if let Err(e) = milter.run(listener).await {
        log::error!("Milter error: {e}");
        process::exit(1);
    }
}

fn generate_default_config(path: &str, domain: &str) {
    let config = Config::new(domain);
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
    println!("Configuration is valid.");
    println!("Domain: {}", config.mail_fully_qualified_domain_name);
    println!("Listen: {}", config.milter_listen);
    println!(
        "Passthrough senders: {}",
        config.passthrough_senders_list.join(", ")
    );
    println!(
        "Passthrough recipients: {}",
        config.passthrough_recipients_list.join(", ")
    );
    println!(
        "Encrypted subjects: {}",
        config
            .encrypted_subjects
            .iter()
            .map(|s| format!("{s:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn test_email_file(
    policy: Arc<PolicyConfig>,
    email_file: &str,
    mail_from: Option<String>,
    rcpts: Vec<String>,
) {
    println!("Testing email file: {email_file}");

    let raw = match std::fs::read(email_file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error reading email file: {e}");
            process::exit(1);
        }
    };
    let message = match Message::parse(&raw) {
        Ok(message) => message,
        Err(e) => {
            eprintln!("Error parsing email file: {e}");
            process::exit(1);
        }
    };

    let mail_from = mail_from
        .or_else(|| message.addresses("From").into_iter().next())
        .unwrap_or_default();
    let rcpts = if rcpts.is_empty() {
        message.addresses("To")
    } else {
        rcpts
    };

    println!("Envelope sender: {mail_from}");
    println!("Envelope recipients: {}", rcpts.join(", "));

    let mut session = Session::new(Arc::new(PolicyEngine::new(policy)));
    let reply = session.replay(&mail_from, &rcpts, &message);
    println!("Result: {reply:?}");
}
