//! Text command parser and executor.
//!
//! Commands share the configured prefix (default `!`). Text that does not
//! start with the prefix, or names a command we do not own, is not ours and
//! gets no reply.

use ck_engine::{CooldownEngine, EngineError, OperatorId, messages};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Cooldowns,
    Settings { dm: Option<bool> },
    SetCooldown { action: String, seconds: u64 },
    ClearCooldown { action: String, user: Option<String> },
    Actions,
    Reload,
    Help,
}

/// `None` when the text is not one of our commands; `Some(Err(usage))` when
/// it is but the arguments are wrong.
pub fn parse(prefix: &str, input: &str) -> Option<Result<Command, String>> {
    let rest = input.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    let parsed = match name.as_str() {
        "cooldowns" | "checkcooldowns" => Ok(Command::Cooldowns),
        "settings" => parse_settings(prefix, &args),
        "setcooldown" => parse_set_cooldown(prefix, &args),
        "clearcooldown" => parse_clear_cooldown(prefix, &args),
        "actions" => Ok(Command::Actions),
        "reload" => Ok(Command::Reload),
        "help" => Ok(Command::Help),
        _ => return None,
    };
    Some(parsed)
}

fn parse_settings(prefix: &str, args: &[&str]) -> Result<Command, String> {
    match args {
        [] => Ok(Command::Settings { dm: None }),
        [key, value] if key.eq_ignore_ascii_case("dm") => parse_toggle(value)
            .map(|dm| Command::Settings { dm: Some(dm) })
            .ok_or_else(|| format!("Usage: `{prefix}settings [dm on|off]`")),
        _ => Err(format!("Usage: `{prefix}settings [dm on|off]`")),
    }
}

fn parse_toggle(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "enable" | "enabled" => Some(true),
        "off" | "false" | "no" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

/// Action names may contain spaces; the last argument is the duration.
fn parse_set_cooldown(prefix: &str, args: &[&str]) -> Result<Command, String> {
    let usage = || format!("Usage: `{prefix}setcooldown <action> <seconds>`");
    let [action @ .., seconds] = args else {
        return Err(usage());
    };
    if action.is_empty() {
        return Err(usage());
    }
    let seconds = seconds.parse::<u64>().map_err(|_| usage())?;
    Ok(Command::SetCooldown {
        action: action.join(" "),
        seconds,
    })
}

fn parse_clear_cooldown(prefix: &str, args: &[&str]) -> Result<Command, String> {
    let usage = || format!("Usage: `{prefix}clearcooldown <action> [user]`");
    match args {
        [] => Err(usage()),
        [action @ .., last] if !action.is_empty() && parse_user_ref(last).is_some() => {
            Ok(Command::ClearCooldown {
                action: action.join(" "),
                user: parse_user_ref(last),
            })
        }
        action => Ok(Command::ClearCooldown {
            action: action.join(" "),
            user: None,
        }),
    }
}

/// Accepts `<@123>`, `<@!123>` or a bare numeric id.
fn parse_user_ref(raw: &str) -> Option<String> {
    let inner = raw
        .strip_prefix("<@")
        .and_then(|r| r.strip_suffix('>'))
        .map(|r| r.strip_prefix('!').unwrap_or(r))
        .unwrap_or(raw);
    (!inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit())).then(|| inner.to_string())
}

pub struct CommandContext<'a> {
    pub user: &'a OperatorId,
    pub is_admin: bool,
    pub prefix: &'a str,
}

#[tracing::instrument(level = "info", skip_all, fields(user = %ctx.user, command = ?command))]
pub async fn execute(engine: &CooldownEngine, ctx: &CommandContext<'_>, command: Command) -> String {
    match command {
        Command::Cooldowns => {
            let active = engine.active_cooldowns(ctx.user);
            if active.is_empty() {
                return "✅ You have no active cooldowns!".to_string();
            }
            let lines: Vec<String> = active
                .iter()
                .map(|c| {
                    format!(
                        "{}: {}",
                        engine.display_name(&c.action),
                        messages::format_duration(Duration::from_secs(c.remaining_seconds))
                    )
                })
                .collect();
            format!("⏳ Active cooldowns:\n{}", lines.join("\n"))
        }
        Command::Settings { dm: None } => {
            let pref = engine.delivery_preference(ctx.user);
            format!(
                "🔧 Your DM reminders are currently **{}**.",
                enabled_label(pref.deliver_direct)
            )
        }
        Command::Settings { dm: Some(dm) } => {
            engine.set_delivery_preference(ctx.user, dm).await;
            format!("✅ DM reminders are now {}.", enabled_label(dm))
        }
        Command::SetCooldown { action, seconds } => {
            if !ctx.is_admin {
                return "❌ Admin only.".to_string();
            }
            match engine.set_action_duration(&action, seconds).await {
                Ok(name) => format!(
                    "✅ Default cooldown for {} set to {seconds}s.",
                    engine.display_name(&name)
                ),
                Err(e) => engine_error_reply(ctx.prefix, &e),
            }
        }
        Command::ClearCooldown { action, user } => {
            let target = match user {
                Some(id) if id != ctx.user.as_str() => {
                    if !ctx.is_admin {
                        return "❌ Admin only.".to_string();
                    }
                    OperatorId::new(id)
                }
                _ => ctx.user.clone(),
            };
            match engine.clear_cooldown(&target, &action).await {
                Ok(true) => format!("✅ Cleared {} for <@{target}>.", action.trim()),
                Ok(false) => format!("Nothing to clear: no active {} for <@{target}>.", action.trim()),
                Err(e) => engine_error_reply(ctx.prefix, &e),
            }
        }
        Command::Actions => {
            let lines: Vec<String> = engine
                .actions()
                .iter()
                .map(|a| {
                    format!(
                        "• {} (`{}`): {}",
                        a.display_name,
                        a.name,
                        messages::format_duration(Duration::from_secs(a.effective_duration_seconds))
                    )
                })
                .collect();
            format!("📋 Tracked actions:\n{}", lines.join("\n"))
        }
        Command::Reload => {
            if !ctx.is_admin {
                return "❌ Admin only.".to_string();
            }
            match engine.reload().await {
                Ok(report) => format!(
                    "✅ Data reloaded from disk. {} cooldown(s) restored.",
                    report.restored
                ),
                Err(e) => {
                    tracing::error!(error = %e, "reload failed");
                    format!("❌ Reload failed: {e}")
                }
            }
        }
        Command::Help => help_text(ctx.prefix),
    }
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

fn engine_error_reply(prefix: &str, error: &EngineError) -> String {
    match error {
        EngineError::UnknownAction(name) => {
            format!("❌ Unknown action: {name}. Try `{prefix}actions`.")
        }
        EngineError::InvalidInput(reason) => format!("❌ {reason}"),
        other => {
            tracing::error!(error = %other, "command failed");
            format!("❌ {other}")
        }
    }
}

pub fn help_text(prefix: &str) -> String {
    [
        format!("`{prefix}cooldowns` show your active cooldowns"),
        format!("`{prefix}settings [dm on|off]` view or change DM reminders"),
        format!("`{prefix}clearcooldown <action> [user]` clear a cooldown"),
        format!("`{prefix}actions` list tracked actions"),
        format!("`{prefix}setcooldown <action> <seconds>` set a default duration (admin)"),
        format!("`{prefix}reload` reload saved data (admin)"),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ck_engine::{
        DeliveryError, DeliveryTransport, Destination, EngineSettings, MemoryBackend,
        ObservedEvent,
    };
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl DeliveryTransport for NullTransport {
        async fn send(&self, _destination: &Destination, _text: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    async fn engine() -> CooldownEngine {
        let settings = EngineSettings {
            sweep_interval: None,
            ..EngineSettings::default()
        };
        CooldownEngine::start(settings, Arc::new(NullTransport), Arc::new(MemoryBackend::new()))
            .await
    }

    fn ctx<'a>(user: &'a OperatorId, is_admin: bool) -> CommandContext<'a> {
        CommandContext {
            user,
            is_admin,
            prefix: "!",
        }
    }

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(parse("!", "!cooldowns"), Some(Ok(Command::Cooldowns)));
        assert_eq!(parse("!", "  !CheckCooldowns "), Some(Ok(Command::Cooldowns)));
        assert_eq!(parse("!", "!settings"), Some(Ok(Command::Settings { dm: None })));
        assert_eq!(
            parse("!", "!settings dm off"),
            Some(Ok(Command::Settings { dm: Some(false) }))
        );
        assert_eq!(
            parse("!", "!setcooldown Refreshing Box 90"),
            Some(Ok(Command::SetCooldown {
                action: "Refreshing Box".to_string(),
                seconds: 90
            }))
        );
        assert_eq!(
            parse("!", "!clearcooldown summon <@!42>"),
            Some(Ok(Command::ClearCooldown {
                action: "summon".to_string(),
                user: Some("42".to_string())
            }))
        );
        assert_eq!(
            parse("!", "!clearcooldown Premium Pack"),
            Some(Ok(Command::ClearCooldown {
                action: "Premium Pack".to_string(),
                user: None
            }))
        );
    }

    #[test]
    fn foreign_text_is_not_a_command() {
        assert_eq!(parse("!", "hello"), None);
        assert_eq!(parse("!", "!play music"), None);
        assert_eq!(parse("!", "!"), None);
        assert_eq!(parse("?", "!cooldowns"), None);
    }

    #[test]
    fn bad_arguments_return_usage() {
        assert!(matches!(parse("!", "!settings dm maybe"), Some(Err(_))));
        assert!(matches!(parse("!", "!setcooldown summon"), Some(Err(_))));
        assert!(matches!(parse("!", "!setcooldown summon -5"), Some(Err(_))));
        assert!(matches!(parse("!", "!clearcooldown"), Some(Err(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldowns_lists_active_entries() {
        let engine = engine().await;
        let op = OperatorId::new("42");
        assert_eq!(
            execute(&engine, &ctx(&op, false), Command::Cooldowns).await,
            "✅ You have no active cooldowns!"
        );

        engine
            .handle_event(ObservedEvent {
                trigger: Some("summon".to_string()),
                operator: Some(op.clone()),
                summary: Some("You summoned 3 cards".to_string()),
                ..ObservedEvent::default()
            })
            .await;
        let reply = execute(&engine, &ctx(&op, false), Command::Cooldowns).await;
        assert!(reply.starts_with("⏳ Active cooldowns:"));
        assert!(reply.contains("Summon: 30m"), "{reply}");
    }

    #[tokio::test(start_paused = true)]
    async fn admin_commands_require_admin() {
        let engine = engine().await;
        let op = OperatorId::new("42");
        let set = Command::SetCooldown {
            action: "summon".to_string(),
            seconds: 60,
        };
        assert_eq!(execute(&engine, &ctx(&op, false), set.clone()).await, "❌ Admin only.");
        assert_eq!(execute(&engine, &ctx(&op, false), Command::Reload).await, "❌ Admin only.");
        assert_eq!(
            execute(&engine, &ctx(&op, true), set).await,
            "✅ Default cooldown for Summon set to 60s."
        );

        let clear_other = Command::ClearCooldown {
            action: "summon".to_string(),
            user: Some("7".to_string()),
        };
        assert_eq!(execute(&engine, &ctx(&op, false), clear_other).await, "❌ Admin only.");
    }

    #[tokio::test(start_paused = true)]
    async fn settings_toggle_round_trips() {
        let engine = engine().await;
        let op = OperatorId::new("42");
        let reply = execute(&engine, &ctx(&op, false), Command::Settings { dm: Some(false) }).await;
        assert_eq!(reply, "✅ DM reminders are now disabled.");
        let reply = execute(&engine, &ctx(&op, false), Command::Settings { dm: None }).await;
        assert!(reply.contains("**disabled**"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_action_points_to_catalog() {
        let engine = engine().await;
        let op = OperatorId::new("42");
        let reply = execute(
            &engine,
            &ctx(&op, false),
            Command::ClearCooldown {
                action: "daily".to_string(),
                user: None,
            },
        )
        .await;
        assert_eq!(reply, "❌ Unknown action: daily. Try `!actions`.");
    }
}
