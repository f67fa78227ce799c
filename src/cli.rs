use crate::{
    account::{ProfileUpdate, SignupRequest},
    app::App,
    event::{format_remaining, short_id, AppEvent},
    model::{OpenTime, ThemeMode},
    timer::COUNTDOWN_INTERVAL_SECS,
};
use anyhow::{anyhow, bail, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;

const DEFAULT_WATCH_SECS: u64 = 10;

pub struct Context {
    pub app: RefCell<App>,
    pub data_dir: PathBuf,
    pub journal_path: Option<PathBuf>,
}

/// Run each command in order, as if typed at the prompt.
pub fn run_once(ctx: &Context, commands: &[String]) -> Result<()> {
    for line in commands {
        print_events(&ctx.app.borrow_mut().tick());
        if handle_command(ctx, line.trim()) {
            break;
        }
    }
    Ok(())
}

pub fn run_repl(ctx: &Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = ctx.data_dir.join("history.txt");
    if rl.load_history(&history).is_err() {
        tracing::debug!(path = %history.display(), "no REPL history yet");
    }

    println!("opento - type /help for commands, /exit to quit");
    print_status(ctx);

    loop {
        let prompt = prompt(ctx);
        match rl.readline(&prompt) {
            Ok(line) => {
                print_events(&ctx.app.borrow_mut().tick());

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if handle_command(ctx, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&history) {
        tracing::warn!(error = %e, "failed to save REPL history");
    }
    Ok(())
}

fn prompt(ctx: &Context) -> String {
    let app = ctx.app.borrow();
    if app.session().is_some() {
        format!("[open {}] > ", format_remaining(app.remaining_secs()))
    } else {
        "> ".to_string()
    }
}

fn print_events(events: &[AppEvent]) {
    for event in events {
        println!("  {}", event);
    }
}

/// Returns `true` when the REPL should exit.
fn handle_command(ctx: &Context, line: &str) -> bool {
    if !line.starts_with('/') {
        println!("Commands start with '/'. Type /help for the list.");
        return false;
    }
    let (cmd, arg) = match line.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };
    match dispatch(ctx, cmd, arg) {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    }
}

fn dispatch(ctx: &Context, cmd: &str, arg: &str) -> Result<bool> {
    match cmd {
        "/exit" | "/quit" => return Ok(true),
        "/help" => print_help(),
        "/status" => print_status(ctx),
        "/signup" => {
            let request = parse_signup(arg)?;
            let mut app = ctx.app.borrow_mut();
            let user = app.signup(request)?;
            println!("Welcome, {} ({})", user.name, user.id);
        }
        "/profile" => {
            let mut app = ctx.app.borrow_mut();
            if arg.is_empty() {
                let user = app.user().ok_or_else(|| anyhow!("not signed in"))?;
                println!("Name:      {}", user.name);
                println!("Email:     {}", user.email);
                println!("Avatar:    {}", user.avatar.as_deref().unwrap_or("-"));
                println!("Interests: {}", user.interests.join(", "));
                println!("Joined:    {}", user.created_at.format("%Y-%m-%d"));
            } else {
                let user = app.update_profile(parse_profile(arg)?)?;
                println!("Profile updated for {}", user.name);
            }
        }
        "/interests" => {
            let mut app = ctx.app.borrow_mut();
            let user = app.set_interests(&split_list(arg))?;
            println!("Interests: {}", user.interests.join(", "));
        }
        "/onboard" => {
            ctx.app.borrow_mut().complete_onboarding()?;
            println!("Onboarding complete");
        }
        "/logout" => {
            print_events(&ctx.app.borrow_mut().logout()?);
            println!("Signed out");
        }
        "/open" => print_events(&ctx.app.borrow_mut().open_session()?),
        "/close" => print_or_note(ctx.app.borrow_mut().close_session()?, "No open session"),
        "/toggle" => print_events(&ctx.app.borrow_mut().toggle_session()?),
        "/extend" => print_or_note(ctx.app.borrow_mut().extend_session()?, "No open session"),
        "/watch" => {
            let secs = if arg.is_empty() {
                DEFAULT_WATCH_SECS
            } else {
                arg.parse()
                    .map_err(|_| anyhow!("usage: /watch [secs]"))?
            };
            watch(ctx, secs);
        }
        "/matches" => print_matches(ctx),
        "/yes" | "/no" => {
            let mut app = ctx.app.borrow_mut();
            let match_id = app.resolve_match_id(require_arg(arg, "/yes|/no <match-id>")?)?;
            print_or_note(app.respond_to_match(&match_id, cmd == "/yes")?, "No change");
        }
        "/done" => {
            let mut app = ctx.app.borrow_mut();
            let match_id = app.resolve_match_id(require_arg(arg, "/done <match-id>")?)?;
            print_events(&app.close_match(&match_id)?);
        }
        "/peer" => {
            let (id, answer) = arg
                .split_once(' ')
                .ok_or_else(|| anyhow!("usage: /peer <match-id> yes|no"))?;
            let interested = parse_answer(answer.trim())?;
            let mut app = ctx.app.borrow_mut();
            let match_id = app.resolve_match_id(id)?;
            let peer_id = {
                let me = app.user().map(|u| u.id.clone()).unwrap_or_default();
                app.matches()
                    .iter()
                    .find(|m| m.id == match_id)
                    .and_then(|m| m.counterpart(&me))
                    .map(|u| u.id.clone())
                    .ok_or_else(|| anyhow!("no counterpart for match {}", short_id(&match_id)))?
            };
            print_or_note(app.respond_as(&match_id, &peer_id, interested)?, "No change");
        }
        "/settings" => {
            let app = ctx.app.borrow();
            let settings = app.settings();
            println!("Default open time: {} min", settings.default_open_time.minutes());
            println!("Theme:             {}", app.theme().as_str());
            if settings.blocked_users.is_empty() {
                println!("Blocked users:     none");
            } else {
                println!("Blocked users:     {}", settings.blocked_users.join(", "));
            }
        }
        "/open-time" => {
            let minutes: u32 = require_arg(arg, "/open-time 30|45|60")?
                .parse()
                .map_err(|_| anyhow!("usage: /open-time 30|45|60"))?;
            let open_time = OpenTime::try_from(minutes).map_err(|e| anyhow!(e))?;
            ctx.app.borrow_mut().set_default_open_time(open_time)?;
            println!("New sessions last {} minutes", open_time.minutes());
        }
        "/block" => {
            let events = ctx
                .app
                .borrow_mut()
                .block_user(require_arg(arg, "/block <user-id>")?)?;
            println!("Blocked {}", arg);
            print_events(&events);
        }
        "/unblock" => {
            ctx.app
                .borrow_mut()
                .unblock_user(require_arg(arg, "/unblock <user-id>")?)?;
            println!("Unblocked {}", arg);
        }
        "/theme" => {
            if arg.is_empty() {
                println!("Theme: {}", ctx.app.borrow().theme().as_str());
            } else {
                let theme = ThemeMode::from_str(arg)
                    .ok_or_else(|| anyhow!("usage: /theme light|dark|system"))?;
                ctx.app.borrow_mut().set_theme(theme)?;
                println!("Theme: {}", theme.as_str());
            }
        }
        "/route" => println!("Route: {}", ctx.app.borrow().route()),
        _ => println!("Unknown command: {}", cmd),
    }
    Ok(false)
}

fn print_help() {
    println!("Commands:");
    println!("  /exit                  - quit");
    println!("  /help                  - show commands");
    println!("  /status                - show user, session and route");
    println!("Account:");
    println!("  /signup name | email | interest, interest");
    println!("  /profile [name=..] [avatar=..]");
    println!("  /interests a, b, c     - replace interests");
    println!("  /onboard               - mark onboarding complete");
    println!("  /logout                - close session and forget this user");
    println!("Session:");
    println!("  /open | /close | /toggle");
    println!("  /extend                - add 30 minutes");
    println!("  /watch [secs]          - let timers run (default 10s)");
    println!("Matches:");
    println!("  /matches               - list matches");
    println!("  /yes <id> | /no <id>   - answer a match");
    println!("  /peer <id> yes|no      - answer as the other person");
    println!("  /done <id>             - close a match after meeting");
    println!("Settings:");
    println!("  /settings");
    println!("  /open-time 30|45|60");
    println!("  /block <user-id> | /unblock <user-id>");
    println!("  /theme [light|dark|system]");
    println!("  /route                 - show current screen");
}

fn print_status(ctx: &Context) {
    let app = ctx.app.borrow();
    match app.user() {
        Some(user) => println!("User: {} <{}>", user.name, user.email),
        None => println!("User: not signed in (try /signup)"),
    }
    if !app.is_onboarded() {
        println!("Onboarding: pending");
    }
    match app.session() {
        Some(session) => println!(
            "Session: open, {} left (until {})",
            format_remaining(app.remaining_secs()),
            session.expires_at.format("%H:%M:%S UTC")
        ),
        None => println!("Session: closed"),
    }
    if app.timers_active() {
        if let Some(at) = app.next_discovery_at() {
            println!("Next discovery: {}", at.format("%H:%M:%S UTC"));
        }
    }
    println!(
        "Matches: {} pending, {} ready",
        app.pending_matches().len(),
        app.ready_matches().len()
    );
    println!("Route: {}", app.route());
    if let Some(path) = &ctx.journal_path {
        println!("Journal: {}", path.display());
    }
}

fn print_matches(ctx: &Context) {
    let app = ctx.app.borrow();
    if app.matches().is_empty() {
        println!("No matches");
        return;
    }
    let me = app.user().map(|u| u.id.as_str()).unwrap_or_default();
    for m in app.matches() {
        let other = m.counterpart(me).map(|u| u.name.as_str()).unwrap_or("?");
        println!(
            "  [{}] {:<18} {:<12} {}",
            short_id(&m.id),
            other,
            m.status,
            m.shared_interests.join(", ")
        );
    }
}

fn print_or_note(events: Vec<AppEvent>, note: &str) {
    if events.is_empty() {
        println!("{}", note);
    } else {
        print_events(&events);
    }
}

/// Let the timers run for `secs` wall-clock seconds.
fn watch(ctx: &Context, secs: u64) {
    if ctx.app.borrow().session().is_none() {
        println!("No open session");
        return;
    }
    let step = std::time::Duration::from_secs(COUNTDOWN_INTERVAL_SECS as u64);
    for _ in 0..secs {
        std::thread::sleep(step);
        let mut app = ctx.app.borrow_mut();
        let events = app.tick();
        for event in &events {
            match event {
                AppEvent::Countdown { remaining_secs } => {
                    print!("\r  {} left   ", format_remaining(*remaining_secs));
                    let _ = std::io::stdout().flush();
                }
                other => println!("\n  {}", other),
            }
        }
        if app.session().is_none() {
            break;
        }
    }
    println!();
}

fn require_arg<'a>(arg: &'a str, usage: &str) -> Result<&'a str> {
    if arg.is_empty() {
        bail!("usage: {}", usage);
    }
    Ok(arg)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_answer(s: &str) -> Result<bool> {
    match s {
        "yes" | "y" => Ok(true),
        "no" | "n" => Ok(false),
        _ => bail!("expected yes or no, got '{}'", s),
    }
}

/// `name | email | interest, interest`
fn parse_signup(arg: &str) -> Result<SignupRequest> {
    let parts: Vec<&str> = arg.splitn(3, '|').map(str::trim).collect();
    let [name, email, interests] = parts.as_slice() else {
        bail!("usage: /signup name | email | interest, interest");
    };
    Ok(SignupRequest {
        name: name.to_string(),
        email: email.to_string(),
        interests: split_list(interests),
    })
}

fn set_profile_field(update: &mut ProfileUpdate, key: &str, value: String) {
    match key {
        "name" => update.name = Some(value),
        _ => update.avatar = Some(value),
    }
}

/// `name=Ada avatar=https://...`; values run to the next `key=`
fn parse_profile(arg: &str) -> Result<ProfileUpdate> {
    let mut update = ProfileUpdate::default();
    let mut current: Option<(&str, String)> = None;

    for word in arg.split_whitespace() {
        match word.split_once('=') {
            Some((key, value)) if key == "name" || key == "avatar" => {
                if let Some((prev, text)) = current.take() {
                    set_profile_field(&mut update, prev, text);
                }
                current = Some((key, value.to_string()));
            }
            _ => match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(word);
                }
                None => bail!("usage: /profile [name=..] [avatar=..]"),
            },
        }
    }
    if let Some((key, text)) = current {
        set_profile_field(&mut update, key, text);
    }
    Ok(update)
}
