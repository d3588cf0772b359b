use std::{error::Error, future::Future, io, process, str::FromStr, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use playsync::{
    bridge::Bridge,
    config::Config,
    credential::FileStorage,
    error::ErrorKind,
    handshake::{Coordinator, DirectTransport, HandshakeTransport, PopupTransport},
    mirror::Snapshot,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Must at least contain the `client_id` registered with the provider.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("playsync.toml"))]
    config_file: String,

    /// Directory to keep the credential in
    ///
    /// Ensure that this directory is kept secure and not shared publicly, as
    /// it contains a credential that can control your account's playback.
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath, default_value_t = String::from(".playsync"))]
    state_dir: String,

    /// Name of the device to control
    ///
    /// [default: `device_name` from the configuration file]
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    name: Option<String>,

    /// Authorize without opening a browser
    ///
    /// Prints the authorization URL and reads the URL you were redirected to
    /// from standard input.
    #[arg(long, default_value_t = false)]
    no_browser: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Failure to understand a line of input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum CommandError {
    #[error("unknown command `{0}`; try `help`")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid argument `{0}`")]
    InvalidArgument(String),
}

/// A line of input.
#[derive(Clone, Debug, PartialEq)]
enum Command {
    Toggle,
    Next,
    Previous,
    Seek(Duration),
    Volume(f32),
    Play(String),
    Context(String),
    Search(String),
    Playlists,
    Status,
    Login,
    Logout,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, argument) = match s.trim().split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (s.trim(), ""),
        };

        let required = |name: &'static str| {
            if argument.is_empty() {
                Err(CommandError::MissingArgument(name))
            } else {
                Ok(argument.to_owned())
            }
        };

        let command = match name {
            "toggle" | "pause" => Self::Toggle,
            "next" => Self::Next,
            "prev" | "previous" => Self::Previous,
            "seek" => {
                let seconds: f64 = required("seek")?
                    .parse()
                    .map_err(|_| CommandError::InvalidArgument(argument.to_owned()))?;
                let position = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| CommandError::InvalidArgument(argument.to_owned()))?;
                Self::Seek(position)
            }
            "volume" => {
                let percent: u8 = required("volume")?
                    .parse()
                    .map_err(|_| CommandError::InvalidArgument(argument.to_owned()))?;
                Self::Volume(f32::from(percent.min(100)) / 100.0)
            }
            "play" => Self::Play(required("play")?),
            "context" => Self::Context(required("context")?),
            "search" => Self::Search(required("search")?),
            "playlists" => Self::Playlists,
            "status" => Self::Status,
            "login" => Self::Login,
            "logout" => Self::Logout,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_owned())),
        };

        Ok(command)
    }
}

const HELP: &str = "\
commands:
  toggle              play or pause
  next | prev         skip forward or back
  seek <seconds>      jump to a position
  volume <0-100>      set the volume
  play <uri>...       play one or more tracks
  context <uri>       play a playlist or album
  search <text>       search for tracks
  playlists           list your playlists
  status              show the playback state
  login | logout      authorize or forget the credential
  quit";

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("playsync", level);
    }

    logger.init();
}

/// Loads the configuration file.
///
/// # Errors
///
/// Returns error if the file is missing or invalid.
fn load_config(config_file: &str) -> playsync::error::Result<Config> {
    let config = Config::from_file(config_file);

    if let Err(ref e) = config {
        if e.kind == ErrorKind::NotFound {
            info!("copy playsync.toml.example to {config_file} and set your client_id");
        }
    }

    config
}

/// One line describing `snapshot`.
fn describe(snapshot: &Snapshot) -> String {
    if !snapshot.connected {
        return "disconnected".to_owned();
    }

    let volume = (snapshot.volume * 100.0).round();
    let Some(track) = &snapshot.track else {
        return format!("idle; volume {volume}%");
    };

    let state = if snapshot.playing { "playing" } else { "paused" };
    let position = snapshot.position.as_secs();
    let duration = snapshot.duration.as_secs();
    format!(
        "{state} {track} [{}:{:02}/{}:{:02}]; volume {volume}%",
        position / 60,
        position % 60,
        duration / 60,
        duration % 60,
    )
}

/// Reads the redirect from standard input.
///
/// Accepts the full URL the browser ended up on, or only its fragment.
fn prompt_for_redirect(url: &Url) -> playsync::error::Result<Option<String>> {
    println!("open this URL in a browser and authorize:\n\n{url}\n");
    println!("then paste the URL you were redirected to (empty to cancel):");

    let mut line = String::new();
    tokio::task::block_in_place(|| io::stdin().read_line(&mut line))?;

    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fragment = line.split_once('#').map_or(line, |(_, fragment)| fragment);
    Ok(Some(fragment.to_owned()))
}

/// Runs a handshake and connects with its credential.
///
/// Returns whether the device became ready, or `None` if Ctrl-C
/// interrupted the handshake.
async fn login(bridge: &Bridge, no_browser: bool) -> Option<bool> {
    let interrupt = tokio::signal::ctrl_c();
    if no_browser {
        let mut coordinator = bridge.coordinator(DirectTransport::new(prompt_for_redirect));
        authorize_until(bridge, &mut coordinator, interrupt).await
    } else {
        let mut coordinator = bridge.coordinator(PopupTransport::new(bridge.config()));
        authorize_until(bridge, &mut coordinator, interrupt).await
    }
}

/// Authorizes with `coordinator` unless `interrupt` completes first, in
/// which case the handshake is cancelled.
async fn authorize_until<T, F>(
    bridge: &Bridge,
    coordinator: &mut Coordinator<T>,
    interrupt: F,
) -> Option<bool>
where
    T: HandshakeTransport,
    F: Future,
{
    let result = tokio::select! {
        biased;

        _ = interrupt => None,
        result = bridge.authorize(coordinator) => Some(result),
    };

    match result {
        Some(Ok(ready)) => Some(ready),
        Some(Err(e)) => {
            error!("authorization failed: {e}");
            Some(false)
        }
        None => {
            coordinator.cancel();
            info!("authorization interrupted");
            None
        }
    }
}

/// Executes one command. Returns `false` when it is time to quit.
async fn execute(bridge: &Bridge, command: Command, no_browser: bool) -> bool {
    let dispatcher = bridge.dispatcher();
    let sent = match command {
        Command::Toggle => dispatcher.toggle_play().await,
        Command::Next => dispatcher.next_track().await,
        Command::Previous => dispatcher.previous_track().await,
        Command::Seek(position) => dispatcher.seek(position).await,
        Command::Volume(volume) => dispatcher.set_volume(volume).await,
        Command::Play(uris) => dispatcher.play_track(uris.split_whitespace()).await,
        Command::Context(uri) => dispatcher.play_collection(uri).await,
        Command::Search(query) => {
            match dispatcher.search(&query).await {
                Ok(tracks) if tracks.is_empty() => println!("no tracks found"),
                Ok(tracks) => {
                    for track in tracks {
                        println!("{}  {track}", track.uri);
                    }
                }
                Err(e) => error!("search failed: {e}"),
            }
            true
        }
        Command::Playlists => {
            match dispatcher.playlists().await {
                Ok(playlists) => {
                    for playlist in playlists {
                        println!(
                            "{}  {} ({} tracks)",
                            playlist.uri, playlist.name, playlist.tracks.total
                        );
                    }
                }
                Err(e) => error!("listing playlists failed: {e}"),
            }
            true
        }
        Command::Status => {
            println!("{}", describe(&bridge.snapshot()));
            true
        }
        Command::Login => login(bridge, no_browser).await.unwrap_or(true),
        Command::Logout => {
            bridge.logout().await;
            true
        }
        Command::Help => {
            println!("{HELP}");
            true
        }
        Command::Quit => return false,
    };

    if !sent {
        warn!("command not sent");
    }
    true
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when the configuration cannot be loaded,
/// or standard input fails.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args.config_file)?;
    if let Some(name) = args.name {
        config.device_name = name;
    }

    let bridge = Bridge::with_connect_device(config, FileStorage::new(&args.state_dir))?;
    bridge.subscribe(std::sync::Arc::new(|snapshot: &Snapshot| {
        info!("{}", describe(snapshot));
    }));

    if !bridge.restore().await {
        match login(&bridge, args.no_browser).await {
            Some(true) => {}
            Some(false) => warn!("device not ready; start it and `login` again"),
            None => {
                info!("shutting down gracefully");
                return Ok(());
            }
        }
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("end of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match line.parse::<Command>() {
                    Ok(command) => {
                        if !execute(&bridge, command, args.no_browser).await {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
        }
    }

    bridge.device().disconnect().await;
    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();
    let lang = String::from("en");

    info!("starting {name}/{version}; {BUILD_PROFILE}; {lang}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
