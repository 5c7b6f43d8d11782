use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use super::session::ensure_session;
use super::{CmdResult, Context, runtime};
use crate::cli::commands::*;
use crate::cli::output::*;
use crate::model::api::{DeadlineUpdate, UserSettingsUpdate};

/// Accept RFC 3339 or a local `YYYY-MM-DD HH:MM[:SS]`, normalized to UTC RFC 3339.
pub fn parse_deadline(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).to_rfc3339());
    }
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
                .ok_or_else(|| format!("{} does not exist in the local timezone", raw));
        }
    }
    Err(format!(
        "invalid time \"{}\" (use RFC 3339 or \"YYYY-MM-DD HH:MM\")",
        raw
    ))
}

pub(super) fn cmd_deadline(ctx: &Context, args: DeadlineCmd) -> CmdResult {
    let rt = runtime()?;
    ensure_session(ctx, &rt)?;
    let client = ctx.client()?;

    let deadline = match args.action {
        DeadlineAction::Get(a) => rt.block_on(client.get_deadline(a.note_id))?,
        DeadlineAction::Set(a) => {
            let at = parse_deadline(&a.at)?;
            rt.block_on(client.create_deadline(a.note_id, &at))?
        }
        DeadlineAction::Update(a) => {
            let update = DeadlineUpdate {
                deadline_at: a.at.as_deref().map(parse_deadline).transpose()?,
                notification_enabled: a.notify,
            };
            rt.block_on(client.update_deadline(a.note_id, &update))?
        }
        DeadlineAction::Toggle(a) => {
            rt.block_on(client.toggle_deadline_notifications(a.note_id))?
        }
        DeadlineAction::Delete(a) => {
            let reply = rt.block_on(client.delete_deadline(a.note_id))?;
            if ctx.json {
                return ctx.print_json(&reply);
            }
            println!("Deadline for note {} removed.", a.note_id);
            return Ok(());
        }
        DeadlineAction::Test(a) => {
            let reply = rt.block_on(client.test_deadline_notification(a.note_id))?;
            if ctx.json {
                return ctx.print_json(&reply);
            }
            match reply.message {
                Some(msg) => println!("{}", msg),
                None if reply.ok => println!("Test notification sent."),
                None => println!("Test notification was not sent."),
            }
            return Ok(());
        }
    };

    if ctx.json {
        return ctx.print_json(&deadline);
    }
    for line in format_deadline(&deadline) {
        println!("{}", line);
    }
    Ok(())
}

pub(super) fn cmd_settings(ctx: &Context, args: SettingsCmd) -> CmdResult {
    let rt = runtime()?;
    ensure_session(ctx, &rt)?;
    let client = ctx.client()?;

    let settings = match args.action {
        None | Some(SettingsAction::Show) => rt.block_on(client.settings())?,
        Some(SettingsAction::Set(a)) => {
            let update = UserSettingsUpdate {
                language: a.language,
                theme: a.theme,
                notification_times_minutes: a.notify_minutes.map(|mut times| {
                    times.sort_unstable_by(|a, b| b.cmp(a));
                    times.dedup();
                    times
                }),
            };
            rt.block_on(client.update_settings(&update))?
        }
    };

    if ctx.json {
        return ctx.print_json(&settings);
    }
    for line in format_settings(&settings) {
        println!("{}", line);
    }
    Ok(())
}

pub(super) fn cmd_tag(ctx: &Context, args: TagCmd) -> CmdResult {
    let rt = runtime()?;
    ensure_session(ctx, &rt)?;
    let client = ctx.client()?;

    match args.action {
        TagAction::Add(a) => {
            let tag = rt.block_on(client.create_tag(&a.name))?;
            if ctx.json {
                return ctx.print_json(&tag);
            }
            println!("Created tag #{} ({})", tag.name, tag.id);
        }
    }
    Ok(())
}

pub(super) fn cmd_register(ctx: &Context, args: CredentialsArgs) -> CmdResult {
    let rt = runtime()?;
    let client = ctx.client()?;
    rt.block_on(client.register(&args.username, &args.uuid))?;
    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "registered": args.username }));
    }
    println!(
        "Registered {}. Log in with `mn login --username {} --uuid <uuid>`.",
        args.username, args.username
    );
    Ok(())
}
