use clap::{Args, Parser, Subcommand};

use crate::model::api::{Language, Theme};

#[derive(Parser)]
#[command(name = "mn", about = concat!("mininote v", env!("CARGO_PKG_VERSION"), " - notes mini-app client"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Client home directory (session store and config.toml)
    #[arg(long, global = true, value_name = "DIR")]
    pub home: Option<String>,

    /// Log resolution steps and HTTP traffic to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one discovery pass and show the launch data found
    Discover(PageArgs),
    /// Resolve launch data into a session token
    Login(LoginArgs),
    /// Show the stored session
    Status,
    /// Remove the stored session token
    Logout(LogoutArgs),
    /// Show the current user as the server sees it
    Whoami,
    /// Feed a message from the hosting frame into the relay
    Relay(RelayArgs),
    /// Show, set or clear the developer override identity
    DevUser(DevUserArgs),
    /// Show or edit config.toml
    Config(ConfigCmd),
    /// Manage note deadlines
    Deadline(DeadlineCmd),
    /// Show or change user settings
    Settings(SettingsCmd),
    /// Manage tags
    Tag(TagCmd),
    /// Create an account for username/uuid login
    Register(CredentialsArgs),
}

// ---------------------------------------------------------------------------
// Session args
// ---------------------------------------------------------------------------

/// What the launch page looks like. Every field is optional; with none of
/// them only cached data and the developer override can resolve.
#[derive(Args, Default)]
pub struct PageArgs {
    /// URL the app was launched with
    #[arg(long)]
    pub url: Option<String>,
    /// Host SDK launch data (repeatable)
    #[arg(long = "sdk", value_name = "NAMESPACE=INITDATA")]
    pub sdk: Vec<String>,
    /// User agent of the hosting webview (selects timing)
    #[arg(long)]
    pub user_agent: Option<String>,
}

#[derive(Args)]
pub struct LoginArgs {
    #[command(flatten)]
    pub page: PageArgs,
    /// Check once instead of waiting for launch data to appear
    #[arg(long)]
    pub no_wait: bool,
    /// Log in with username and uuid instead of launch data
    #[arg(long, requires = "uuid", conflicts_with_all = ["url", "sdk"])]
    pub username: Option<String>,
    #[arg(long, requires = "username")]
    pub uuid: Option<String>,
}

#[derive(Args)]
pub struct LogoutArgs {
    /// Also forget cached and relayed launch data
    #[arg(long)]
    pub forget: bool,
}

#[derive(Args)]
pub struct RelayArgs {
    /// Message payload: JSON, or a raw string
    #[arg(required_unless_present_any = ["request", "clear"])]
    pub message: Option<String>,
    /// Print the message to post to the hosting frame
    #[arg(long, conflicts_with = "clear")]
    pub request: bool,
    /// Forget relayed data
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args)]
pub struct DevUserArgs {
    /// User id to impersonate when no launch data is found
    pub id: Option<String>,
    /// Remove the override
    #[arg(long, conflicts_with = "id")]
    pub clear: bool,
}

#[derive(Args)]
pub struct CredentialsArgs {
    pub username: String,
    pub uuid: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Set a key, e.g. `mn config set exchange.max_attempts 5`
    Set(ConfigSetArgs),
}

#[derive(Args)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Remote commands
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct DeadlineCmd {
    #[command(subcommand)]
    pub action: DeadlineAction,
}

#[derive(Subcommand)]
pub enum DeadlineAction {
    /// Show a note's deadline
    Get(NoteArg),
    /// Attach a deadline to a note
    Set(DeadlineSetArgs),
    /// Change a deadline
    Update(DeadlineUpdateArgs),
    /// Remove a note's deadline
    Delete(NoteArg),
    /// Flip notifications for a deadline
    Toggle(NoteArg),
    /// Send a test notification
    Test(NoteArg),
}

#[derive(Args)]
pub struct NoteArg {
    pub note_id: i64,
}

#[derive(Args)]
pub struct DeadlineSetArgs {
    pub note_id: i64,
    /// RFC 3339 timestamp or local "YYYY-MM-DD HH:MM"
    pub at: String,
}

#[derive(Args)]
pub struct DeadlineUpdateArgs {
    pub note_id: i64,
    /// New time (RFC 3339 or local "YYYY-MM-DD HH:MM")
    #[arg(long)]
    pub at: Option<String>,
    /// Enable or disable notifications
    #[arg(long, value_name = "on|off", value_parser = parse_switch)]
    pub notify: Option<bool>,
}

#[derive(Args)]
pub struct SettingsCmd {
    #[command(subcommand)]
    pub action: Option<SettingsAction>,
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show current settings
    Show,
    /// Change settings
    Set(SettingsSetArgs),
}

#[derive(Args)]
pub struct SettingsSetArgs {
    /// ru or en
    #[arg(long)]
    pub language: Option<Language>,
    /// light or dark
    #[arg(long)]
    pub theme: Option<Theme>,
    /// Reminder offsets in minutes before a deadline, comma-separated
    #[arg(long, value_delimiter = ',', num_args = 0..)]
    pub notify_minutes: Option<Vec<u32>>,
}

#[derive(Args)]
pub struct TagCmd {
    #[command(subcommand)]
    pub action: TagAction,
}

#[derive(Subcommand)]
pub enum TagAction {
    /// Create a tag
    Add(TagAddArgs),
}

#[derive(Args)]
pub struct TagAddArgs {
    pub name: String,
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(format!("expected on or off, got \"{}\"", s)),
    }
}
