use once_cell::sync::Lazy;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct BuiltinIgnores {
    #[serde(default)]
    pub common: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromptTexts {
    pub system: String,
}

static BUILTIN_IGNORE_PATTERNS: Lazy<BuiltinIgnores> = Lazy::new(|| {
    let yaml_content = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../data/builtin_ignores.yaml"
    ));
    serde_yml::from_str(yaml_content).expect("Failed to parse embedded data/builtin_ignores.yaml")
});
static PROMPT_TEXTS: Lazy<PromptTexts> = Lazy::new(|| {
    let yaml_content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../data/prompts.yaml"));
    serde_yml::from_str(yaml_content).expect("Failed to parse embedded data/prompts.yaml")
});

pub fn get_builtin_ignore_patterns() -> &'static BuiltinIgnores {
    &BUILTIN_IGNORE_PATTERNS
}

/// Default system prompt asking the model to choose between the ask, context
/// and plan modes on its own.
pub fn get_default_system_prompt() -> &'static str {
    &PROMPT_TEXTS.system
}
