mod remote;
mod session;

use std::error::Error;
use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::api::client::ApiClient;
use crate::api::transport::{HttpTransport, Transport};
use crate::cli::commands::*;
use crate::cli::output::*;
use crate::host::relay::{self, MessageRelay};
use crate::io::config_io;
use crate::io::store::{FileStore, KeyValueStore};
use crate::model::config::ClientConfig;
use crate::model::session::{
    CACHED_CREDENTIAL_KEY, DEV_USER_KEY, PROFILE_KEY, RELAY_KEY, SessionToken, TOKEN_KEY,
    UserProfile,
};

type CmdResult = Result<(), Box<dyn Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    // Editing config must work even when the current file does not load
    if let Commands::Config(ConfigCmd {
        action: Some(ConfigAction::Set(set)),
    }) = &cli.command
    {
        return cmd_config_set(cli.home.as_deref(), cli.json, set);
    }

    let ctx = Context::load(cli.home.as_deref(), cli.json)?;

    match cli.command {
        // Local state only
        Commands::Status => cmd_status(&ctx),
        Commands::Logout(args) => cmd_logout(&ctx, args),
        Commands::Relay(args) => cmd_relay(&ctx, args),
        Commands::DevUser(args) => cmd_dev_user(&ctx, args),
        Commands::Config(_) => cmd_config_show(&ctx),
        Commands::Discover(args) => session::cmd_discover(&ctx, args),

        // Talk to the backend
        Commands::Login(args) => session::cmd_login(&ctx, args),
        Commands::Whoami => session::cmd_whoami(&ctx),
        Commands::Deadline(args) => remote::cmd_deadline(&ctx, args),
        Commands::Settings(args) => remote::cmd_settings(&ctx, args),
        Commands::Tag(args) => remote::cmd_tag(&ctx, args),
        Commands::Register(args) => remote::cmd_register(&ctx, args),
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a command needs: where state lives, config, output mode.
pub(crate) struct Context {
    config: ClientConfig,
    store: Arc<FileStore>,
    json: bool,
}

impl Context {
    fn load(home: Option<&str>, json: bool) -> Result<Self, Box<dyn Error>> {
        let home = config_io::client_home(home);
        let config = config_io::load_config(&home)?;
        let store = Arc::new(FileStore::open(&home)?);
        log::debug!("client home {}", home.display());
        Ok(Context {
            config,
            store,
            json,
        })
    }

    fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, Box<dyn Error>> {
        let transport = HttpTransport::new(&self.config.api.base_url, self.config.request_timeout())?;
        Ok(Arc::new(transport))
    }

    fn client(&self) -> Result<ApiClient, Box<dyn Error>> {
        Ok(ApiClient::new(self.transport()?, self.store()))
    }

    fn print_json<T: serde::Serialize>(&self, value: &T) -> CmdResult {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

fn runtime() -> Result<Runtime, Box<dyn Error>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {}", e))?;
    Ok(rt)
}

// ---------------------------------------------------------------------------
// Local commands
// ---------------------------------------------------------------------------

fn cmd_status(ctx: &Context) -> CmdResult {
    let token = ctx.store.get(TOKEN_KEY)?.and_then(SessionToken::new);
    let user = ctx
        .store
        .get(PROFILE_KEY)?
        .and_then(|raw| serde_json::from_str::<UserProfile>(&raw).ok());
    let cached = ctx.store.get(CACHED_CREDENTIAL_KEY)?;
    let relayed = ctx.store.get(RELAY_KEY)?;
    let dev_user = ctx.store.get(DEV_USER_KEY)?;

    if ctx.json {
        return ctx.print_json(&StatusJson {
            authenticated: token.is_some(),
            token: token.as_ref().map(|t| t.preview()),
            user,
            cached_credential: cached,
            relayed_credential: relayed,
            dev_user,
            store: ctx.store.path().display().to_string(),
        });
    }

    match &token {
        Some(t) => println!("session:     authenticated (token {})", t.preview()),
        None => println!("session:     not logged in"),
    }
    if let Some(user) = &user {
        println!("user:        {}", format_profile(user));
    }
    println!("launch data: {}", cached.as_deref().unwrap_or("none cached"));
    if let Some(relayed) = &relayed {
        println!("relayed:     {}", relayed);
    }
    if let Some(dev) = &dev_user {
        println!("dev user:    {}", dev);
    }
    println!("store:       {}", ctx.store.path().display());
    Ok(())
}

fn cmd_logout(ctx: &Context, args: LogoutArgs) -> CmdResult {
    let had_token = ctx.store.get(TOKEN_KEY)?.is_some();
    ctx.store.remove(TOKEN_KEY)?;
    ctx.store.remove(PROFILE_KEY)?;
    if args.forget {
        ctx.store.remove(CACHED_CREDENTIAL_KEY)?;
        ctx.store.remove(RELAY_KEY)?;
    }
    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "logged_out": had_token }));
    }
    if had_token {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

fn cmd_relay(ctx: &Context, args: RelayArgs) -> CmdResult {
    let relay = MessageRelay::new(ctx.store());

    if args.request {
        println!("{}", relay::request_message());
        return Ok(());
    }
    if args.clear {
        relay.clear()?;
        if !ctx.json {
            println!("Relayed launch data cleared.");
        }
        return Ok(());
    }

    let raw = args.message.unwrap_or_default();
    let message = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
    let outcome = relay.receive(&message)?;

    if ctx.json {
        return ctx.print_json(&relay_to_json(&outcome));
    }
    match outcome {
        relay::RelayOutcome::Accepted(cred) => println!("Accepted: {}", cred),
        relay::RelayOutcome::AlreadyRelayed => {
            println!("Ignored: launch data was already relayed (use --clear to reset)")
        }
        relay::RelayOutcome::Ignored => println!("Ignored: message carries no launch data"),
    }
    Ok(())
}

fn cmd_dev_user(ctx: &Context, args: DevUserArgs) -> CmdResult {
    if args.clear {
        ctx.store.remove(DEV_USER_KEY)?;
        if !ctx.json {
            println!("Developer override removed.");
        }
        return Ok(());
    }

    if let Some(id) = args.id {
        let id = id.trim();
        if id.is_empty() {
            return Err("user id is empty".into());
        }
        ctx.store.set(DEV_USER_KEY, id)?;
        if !ctx.json {
            println!("Developer override set: user {}", id);
        }
        return Ok(());
    }

    let current = ctx.store.get(DEV_USER_KEY)?;
    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "dev_user": current }));
    }
    match current {
        Some(id) => println!("{}", id),
        None => println!("No developer override set."),
    }
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> CmdResult {
    if ctx.json {
        return ctx.print_json(&ctx.config);
    }
    print!("{}", toml::to_string_pretty(&ctx.config)?);
    Ok(())
}

fn cmd_config_set(home: Option<&str>, json: bool, set: &ConfigSetArgs) -> CmdResult {
    let home = config_io::client_home(home);
    config_io::update_value(&home, &set.key, &set.value)?;
    if !json {
        println!("{} = {}", set.key, set.value);
    }
    Ok(())
}
