#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use persona_module::service::ServiceConfig;
use tempfile::TempDir;

pub const PERSONA_ID: &str = "UROMAN";
pub const OPERATOR_ID: &str = "UFOUNDER";
pub const CHANNEL_ID: &str = "C123";
pub const VERIFY_TOKEN: &str = "verify-token";

/// Persona that is always on duty and never staggers, so tests do not depend
/// on the wall clock.
pub fn write_persona(dir: &Path, max_turns: u32, cooldown_secs: u64) -> std::path::PathBuf {
    std::fs::write(dir.join("prompt.md"), "You are Roman Bell, Chief Strategy Officer.").unwrap();
    let path = dir.join("persona.toml");
    std::fs::write(
        &path,
        format!(
            r#"
id = "roman"
display_name = "Roman Bell"
prompt_path = "prompt.md"
keywords = ["strategy", "risk"]
model = "gpt-test"
max_tokens = 64
max_turns = {max_turns}
cooldown_secs = {cooldown_secs}
stagger_base_ms = 0
stagger_jitter_ms = 0

[working_hours]
timezone = "UTC"
start_hour = 0
end_hour = 24
days = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]
"#
        ),
    )
    .unwrap();
    path
}

pub fn test_config(dir: &TempDir, api_base: &str, max_turns: u32, cooldown_secs: u64) -> ServiceConfig {
    let persona_path = write_persona(dir.path(), max_turns, cooldown_secs);
    let vars: HashMap<&str, String> = HashMap::from([
        ("SLACK_VERIFICATION_TOKEN", VERIFY_TOKEN.to_string()),
        ("OPENAI_API_KEY", "sk-test".to_string()),
        ("SLACK_BOT_TOKEN", "xoxb-test".to_string()),
        ("SLACK_CHANNEL_ID", CHANNEL_ID.to_string()),
        ("OPERATOR_USER_ID", OPERATOR_ID.to_string()),
        ("PERSONA_BOT_USER_ID", PERSONA_ID.to_string()),
        ("PERSONA_CONFIG_PATH", persona_path.to_string_lossy().into_owned()),
        ("PERSONA_HOST", "127.0.0.1".to_string()),
        ("OPENAI_API_URL", api_base.to_string()),
        ("SLACK_API_BASE_URL", api_base.to_string()),
        ("OUTBOUND_TIMEOUT_SECS", "5".to_string()),
    ]);
    ServiceConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub fn event_callback(event_type: &str, user: &str, text: &str, ts: &str, thread_ts: Option<&str>) -> Vec<u8> {
    let mut event = serde_json::json!({
        "type": event_type,
        "user": user,
        "text": text,
        "channel": CHANNEL_ID,
        "ts": ts,
    });
    if let Some(thread_ts) = thread_ts {
        event["thread_ts"] = serde_json::Value::String(thread_ts.to_string());
    }
    serde_json::to_vec(&serde_json::json!({
        "token": VERIFY_TOKEN,
        "team_id": "T1",
        "type": "event_callback",
        "event_id": format!("Ev{}", ts.replace('.', "")),
        "event": event,
    }))
    .unwrap()
}
