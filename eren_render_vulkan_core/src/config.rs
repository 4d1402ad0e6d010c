use ash::vk;

pub const VALIDATION_ENV: &str = "EREN_VALIDATION";

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub application_name: String,
    pub enable_validation: bool,
    pub depth_format: vk::Format,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            application_name: "Eren Engine".to_string(),
            enable_validation: cfg!(debug_assertions),
            depth_format: vk::Format::D32_SFLOAT,
        }
    }
}

impl ContextConfig {
    /// Defaults, with `EREN_VALIDATION=0|1` overriding the validation toggle.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(enable) = std::env::var(VALIDATION_ENV)
            .ok()
            .and_then(|value| parse_flag(&value))
        {
            config.enable_validation = enable;
        }
        config
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => {
            log::warn!("Ignoring unrecognised {VALIDATION_ENV} value `{value}`");
            None
        }
    }
}
