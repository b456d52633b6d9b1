use keyloom::config::Config;

/// Results of the live checks run by `keyloom status`.
pub struct StatusProbe {
    pub store: Result<(), String>,
    pub fallback: Result<Option<String>, String>,
}

fn check(ok: bool) -> &'static str {
    if ok { "ok" } else { "unavailable" }
}

pub fn render_status(config: &Config, probe: &StatusProbe) -> String {
    let mut lines = vec![
        format!("◆ Keyloom {}", env!("CARGO_PKG_VERSION")),
        String::new(),
        format!("  Config         {}", config.config_path.display()),
        format!(
            "  Gateway        {}:{}",
            config.gateway.host, config.gateway.port
        ),
        String::new(),
        format!("  Provider keys  {}", config.gemini.api_keys.len()),
        format!("  Chat model     {}", config.gemini.chat_model),
        format!("  Image model    {}", config.gemini.image_model),
        String::new(),
        format!(
            "  Session store  {} ({})",
            config.session.resolved_db_path().display(),
            check(probe.store.is_ok())
        ),
    ];
    if let Err(error) = &probe.store {
        lines.push(format!("                 {error}"));
    }

    if config.fallback.enabled {
        lines.push(format!(
            "  Fallback       {} ({})",
            config.fallback.base_url,
            check(probe.fallback.is_ok())
        ));
        match &probe.fallback {
            Ok(Some(checkpoint)) => lines.push(format!("                 checkpoint {checkpoint}")),
            Ok(None) => lines.push("                 checkpoint (server default)".to_string()),
            Err(error) => lines.push(format!("                 {error}")),
        }
    } else {
        lines.push("  Fallback       disabled".to_string());
    }

    lines.join("\n")
}
