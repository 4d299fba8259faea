mod console;

use crate::console::{Console, Input};
use clap::Parser;
use crossterm::style::Stylize;
use source_rcon_client::r#async::{Client, ConnectOptions};
use source_rcon_client::Error;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Port Source servers listen for RCON on unless configured otherwise.
const DEFAULT_PORT: u16 = 27015;

/// How long to wait before reconnecting in `--repeat` mode.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address of the server, e.g. `127.0.0.1:27015`. The port defaults to 27015.
    #[clap(env = "ADDR")]
    address: String,

    /// RCON password. Prompted for if not given.
    #[clap(long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Connection timeout, e.g. `500ms` or `2s`.
    #[clap(long, default_value = "1s", value_parser = parse_duration)]
    timeout: Duration,

    /// Log protocol traffic.
    #[clap(long)]
    debug: bool,

    /// Run a command and exit. Can be given several times.
    #[clap(short = 'c', long = "command", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Run the commands again after this interval, forever, reconnecting when the connection
    /// fails.
    #[clap(long, value_name = "INTERVAL", value_parser = parse_duration, requires = "commands")]
    repeat: Option<Duration>,

    /// Read commands from stdin line by line, without the line editor.
    #[clap(long)]
    no_interactive: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ! {
    let args = Args::parse();
    init_logging(args.debug);

    let address = with_default_port(&args.address);

    if args.commands.is_empty() {
        let client = connect_interactive(&address, &args).await;
        repl_loop(client, &address, args.no_interactive).await
    }

    let password = match &args.password {
        Some(password) => password.clone(),
        None => read_password(&address),
    };
    let options = ConnectOptions::new()
        .password(password)
        .timeout(args.timeout);

    match args.repeat {
        Some(interval) => repeat_loop(&address, options, &args.commands, interval).await,
        None => run_commands(&address, options, &args.commands).await,
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Adds the default port to an address that has none.
fn with_default_port(address: &str) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip_addr) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip_addr, DEFAULT_PORT).to_string();
    }
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, DEFAULT_PORT)
    }
}

/// Parses durations like `250ms`, `1.5s` or `2m`. A bare number is in seconds.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let unit_start = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(unit_start);

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration `{}`", input))?;
    let secs = match unit {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        _ => return Err(format!("unknown unit `{}` in duration `{}`", unit, input)),
    };

    Duration::try_from_secs_f64(secs).map_err(|err| err.to_string())
}

fn read_password(address: &str) -> String {
    print!("{}'s password: ", address);
    let _ = std::io::stdout().flush();

    match rpassword::read_password() {
        Ok(password) => password,
        Err(err) => {
            eprintln!("Could not read password: {}", err);
            proc_exit::Code::FAILURE.process_exit()
        }
    }
}

/// Connects and authenticates, asking for the password again if it was typed in wrong.
async fn connect_interactive(address: &str, args: &Args) -> Client {
    loop {
        let password = match &args.password {
            Some(password) => password.clone(),
            None => read_password(address),
        };
        let options = ConnectOptions::new()
            .password(password)
            .timeout(args.timeout);

        match Client::connect(address, options).await {
            Ok(client) => return client,
            Err(Error::AuthenticationFailed) if args.password.is_none() => {
                println!("Invalid password.");
            }
            Err(err) => {
                error!("Connection failed: {}", err);
                proc_exit::Code::FAILURE.process_exit()
            }
        }
    }
}

async fn run_commands(address: &str, options: ConnectOptions, commands: &[String]) -> ! {
    let client = match Client::connect(address, options).await {
        Ok(client) => client,
        Err(err) => {
            error!("Connection failed: {}", err);
            proc_exit::Code::FAILURE.process_exit()
        }
    };

    for command in commands {
        match client.send(command).await {
            Ok(response) => print_response(&mut std::io::stdout(), &response),
            Err(err) => {
                error!("`{}` failed: {}", command, err);
                let _ = client.close().await;
                proc_exit::Code::FAILURE.process_exit()
            }
        }
    }

    let _ = client.close().await;
    proc_exit::Code::SUCCESS.process_exit()
}

/// Runs the commands every `interval` forever. Failures are logged and followed by a reconnect.
async fn repeat_loop(
    address: &str,
    options: ConnectOptions,
    commands: &[String],
    interval: Duration,
) -> ! {
    loop {
        let client = match Client::connect(address, options.clone()).await {
            Ok(client) => client,
            Err(err) => {
                warn!("Connection failed: {}", err);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        'session: loop {
            for command in commands {
                match client.send(command).await {
                    Ok(response) => print_response(&mut std::io::stdout(), &response),
                    Err(err) => {
                        warn!("`{}` failed: {}", command, err);
                        break 'session;
                    }
                }
            }
            tokio::time::sleep(interval).await;
        }

        let _ = client.close().await;
    }
}

async fn repl_loop(client: Client, address: &str, no_interactive: bool) -> ! {
    info!(
        "Connected. View builtins with `!help`. {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let prompt = format!("{}> ", address.to_string().green());
    let mut console = Console::open(prompt, no_interactive);

    let code = loop {
        let line = match console.read().await {
            Ok(Input::Line(line)) => line,
            Ok(Input::Eof) => break proc_exit::Code::SUCCESS,
            Ok(Input::Interrupted) => break proc_exit::Code::SIGINT,
            Err(err) => {
                error!("Could not read input: {}", err);
                break proc_exit::Code::FAILURE;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(builtin) = line.strip_prefix('!') {
            match builtin.trim() {
                "help" => print_help(console.out()),
                "quit" | "exit" => break proc_exit::Code::SUCCESS,
                _ => {
                    let _ = writeln!(console.err(), "Unknown builtin.");
                }
            }
            continue;
        }

        match client.send(line).await {
            Ok(response) => print_response(console.out(), &response),
            Err(Error::Transport(err)) => {
                error!("Connection closed: {}", err);
                break proc_exit::Code::FAILURE;
            }
            Err(err) => {
                let _ = writeln!(console.err(), "An error occurred: {}", err);
            }
        }
    };

    // restores the terminal before exiting
    drop(console);
    let _ = client.close().await;
    code.process_exit()
}

fn print_help(out: &mut dyn Write) {
    let _ = writeln!(
        out,
        "{} {}",
        env!("CARGO_PKG_NAME").green(),
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "BUILTINS".yellow());
    let _ = writeln!(out, "    !help                View this help listing");
    let _ = writeln!(out, "    !quit                Close the connection and exit");
    let _ = writeln!(
        out,
        "    {}  Run a command on the server",
        "<COMMAND> [ARGS...]".green()
    );
}

fn print_response(out: &mut dyn Write, response: &str) {
    if response.is_empty() {
        return;
    }
    let _ = write!(out, "{}", response);
    if !response.ends_with('\n') {
        let _ = writeln!(out);
    }
}
