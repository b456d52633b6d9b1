use super::Config;

/// Upper bound on `GEMINI_API_KEY_<n>` variables scanned.
const MAX_NUMBERED_KEYS: usize = 64;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let numbered: Vec<String> = (1..=MAX_NUMBERED_KEYS)
            .map_while(|n| var(&format!("GEMINI_API_KEY_{n}")))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        if !numbered.is_empty() {
            self.gemini.api_keys = numbered;
        } else if let Some(keys) = var("GEMINI_API_KEYS") {
            let keys: Vec<String> = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToOwned::to_owned)
                .collect();
            if !keys.is_empty() {
                self.gemini.api_keys = keys;
            }
        }

        if let Some(port_str) = var("KEYLOOM_GATEWAY_PORT").or_else(|| var("PORT"))
            && let Ok(port) = port_str.parse::<u16>()
        {
            self.gateway.port = port;
        }

        if let Some(host) = var("KEYLOOM_GATEWAY_HOST").or_else(|| var("HOST"))
            && !host.is_empty()
        {
            self.gateway.host = host;
        }

        if let Some(db_path) = var("KEYLOOM_DB_PATH")
            && !db_path.is_empty()
        {
            self.session.db_path = db_path;
        }

        if let Some(url) = var("KEYLOOM_FALLBACK_URL")
            && !url.is_empty()
        {
            self.fallback.base_url = url;
        }

        if let Some(level) = var("KEYLOOM_LOG_LEVEL")
            && !level.is_empty()
        {
            self.observability.log_level = level;
        }
    }
}
