use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{CmdResult, Context, runtime};
use crate::auth::discovery::Discovery;
use crate::auth::resolver::{Resolution, ResolutionState, ResolveReport, Resolver};
use crate::cli::commands::{LoginArgs, PageArgs};
use crate::cli::output::*;
use crate::host::page::{HostEnvironment, PageContext};
use crate::io::store::KeyValueStore;
use crate::model::platform::TimingProfile;
use crate::model::session::TOKEN_KEY;

fn page_from_args(args: &PageArgs) -> Result<PageContext, Box<dyn std::error::Error>> {
    let mut page = PageContext::new();
    if let Some(url) = &args.url {
        page = page.with_url(url)?;
    }
    for pair in &args.sdk {
        page = page.with_sdk_pair(pair)?;
    }
    if let Some(ua) = &args.user_agent {
        page = page.with_user_agent(ua);
    }
    Ok(page)
}

/// Resolve, cancelling on Ctrl-C.
async fn resolve_interruptibly(resolver: &Resolver) -> ResolveReport {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted; cancelling resolution");
            trigger.cancel();
        }
    });
    let report = resolver.resolve(&cancel).await;
    watcher.abort();
    report
}

pub(super) fn cmd_discover(ctx: &Context, args: PageArgs) -> CmdResult {
    let host: Arc<dyn HostEnvironment> = Arc::new(page_from_args(&args)?);
    let discovery = Discovery::new(host, ctx.store(), ctx.config.discovery.clone());
    let found = discovery.discover();

    if ctx.json {
        return ctx.print_json(&discovered_to_json(found.as_ref()));
    }
    match &found {
        Some(found) => {
            for line in format_discovered(found) {
                println!("{}", line);
            }
        }
        None => println!("No launch data found."),
    }
    Ok(())
}

pub(super) fn cmd_login(ctx: &Context, args: LoginArgs) -> CmdResult {
    let rt = runtime()?;

    if let (Some(username), Some(uuid)) = (&args.username, &args.uuid) {
        let client = ctx.client()?;
        let token = rt.block_on(client.login(username, uuid))?;
        if ctx.json {
            return ctx.print_json(&LoginJson {
                state: ResolutionState::Authenticated,
                token: Some(token.preview()),
                error: None,
            });
        }
        println!("Logged in as {}.", username);
        return Ok(());
    }

    let host = Arc::new(page_from_args(&args.page)?);
    let mut resolver = Resolver::from_config(&ctx.config, host, ctx.store(), ctx.transport()?);
    if args.no_wait {
        let timing = resolver.timing().without_waiting();
        resolver = resolver.with_timing(timing);
    }

    let report = rt.block_on(resolve_interruptibly(&resolver));
    let (token, error) = match &report.resolution {
        Resolution::Authenticated(token) => (Some(token.preview()), None),
        Resolution::Exhausted(reason) => (None, Some(reason.to_string())),
        Resolution::Cancelled => (None, Some("cancelled".to_string())),
    };

    if ctx.json {
        ctx.print_json(&LoginJson {
            state: resolver.state(),
            token,
            error: error.clone(),
        })?;
    } else if let Some(token) = &token {
        println!("Logged in (token {}).", token);
    }

    match error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub(super) fn cmd_whoami(ctx: &Context) -> CmdResult {
    let rt = runtime()?;
    ensure_session(ctx, &rt)?;
    let profile = rt.block_on(ctx.client()?.me())?;
    if ctx.json {
        return ctx.print_json(&profile);
    }
    println!("{}", format_profile(&profile));
    Ok(())
}

/// Make sure a token is stored before an authenticated call.
///
/// Without a token this runs one quick resolution pass over cached data and
/// the developer override; live page sources need `mn login`.
pub(super) fn ensure_session(ctx: &Context, rt: &tokio::runtime::Runtime) -> CmdResult {
    if ctx.store.get(TOKEN_KEY)?.is_some() {
        return Ok(());
    }
    log::info!("no session token; resolving from stored launch data");

    let resolver = Resolver::from_config(
        &ctx.config,
        Arc::new(PageContext::new()),
        ctx.store(),
        ctx.transport()?,
    );
    let timing = TimingProfile {
        outer_attempts: 1,
        ..resolver.timing().without_waiting()
    };
    let resolver = resolver.with_timing(timing);

    match rt.block_on(resolve_interruptibly(&resolver)).resolution {
        Resolution::Authenticated(_) => Ok(()),
        Resolution::Exhausted(reason) => {
            Err(format!("not logged in ({}); run `mn login` first", reason).into())
        }
        Resolution::Cancelled => Err("cancelled".into()),
    }
}
