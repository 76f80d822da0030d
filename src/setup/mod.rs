//! Interactive configuration wizard for `--setup`. Out of scope for
//! orchestration itself; this just collects values and writes
//! `config.toml` + `.env` to the config directory `config.rs` reads from.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

/// Entry point for `call-orchestrator --setup`.
pub fn run() {
    if !std::io::stdin().is_terminal() {
        eprintln!("Error: --setup requires an interactive terminal");
        std::process::exit(1);
    }

    println!();
    println!("  call-orchestrator setup");
    println!("  Interactive configuration wizard");

    println!("\n  >> Carrier");
    let variant = loop {
        let v = ask("Carrier (telnyx/twilio)", Some("telnyx"));
        match v.to_lowercase().as_str() {
            "telnyx" => break "telnyx",
            "twilio" => break "twilio",
            _ => println!("  ! Enter \"telnyx\" or \"twilio\""),
        }
    };
    let account_id = ask_secret(if variant == "telnyx" {
        "API Key"
    } else {
        "Account SID"
    });
    let secret = ask_secret(if variant == "telnyx" {
        "Webhook ed25519 public key (base64)"
    } else {
        "Auth Token"
    });
    let connection_id = if variant == "telnyx" {
        Some(ask("Call Control Connection ID", None))
    } else {
        None
    };
    let caller_id = loop {
        let num = ask("Caller ID (E.164)", None);
        if validate_e164(&num) {
            break num;
        }
        println!("  ! Invalid E.164 format (expected: +<digits>)");
    };

    println!("\n  >> Called party");
    let user_number = loop {
        let num = ask("User Number (E.164)", None);
        if validate_e164(&num) {
            break num;
        }
        println!("  ! Invalid E.164 format (expected: +<digits>)");
    };

    println!("\n  >> Speech service");
    let speech_api_key = ask_secret("API Key");
    let voice = ask("Voice (alloy/echo/fable/onyx/nova/shimmer)", Some("onyx"));

    println!("\n  >> Server");
    let public_url = ask("Public URL (leave blank if set later by a tunnel)", Some(""));
    let tunnel_auth_token = ask("Tunnel auth token (optional)", Some(""));

    let config_dir = write_config(ConfigValues {
        variant: variant.to_string(),
        account_id,
        secret,
        connection_id,
        caller_id,
        user_number,
        speech_api_key,
        voice,
        public_url: if public_url.is_empty() { None } else { Some(public_url) },
        tunnel_auth_token: if tunnel_auth_token.is_empty() {
            None
        } else {
            Some(tunnel_auth_token)
        },
    });

    println!("\n  Setup complete!");
    println!();
    println!("  Next steps:");
    println!("    1. Review {}/config.toml", config_dir.display());
    println!("    2. Run: call-orchestrator");
    println!();
}

struct ConfigValues {
    variant: String,
    account_id: String,
    secret: String,
    connection_id: Option<String>,
    caller_id: String,
    user_number: String,
    speech_api_key: String,
    voice: String,
    public_url: Option<String>,
    tunnel_auth_token: Option<String>,
}

fn write_config(values: ConfigValues) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_dir = PathBuf::from(home).join(".call-orchestrator");

    println!("\n  >> Writing configuration");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).expect("failed to create config directory");
    }

    let connection_id_line = match &values.connection_id {
        Some(id) => format!("connection_id = \"{id}\"\n"),
        None => String::new(),
    };
    let public_url_line = match &values.public_url {
        Some(url) => format!("public_url = \"{url}\"\n"),
        None => String::new(),
    };

    let config_toml = format!(
        r#"[server]
host = "0.0.0.0"
port = 3333
user_number = "{user_number}"
{public_url_line}strict_signatures = false

[carrier]
variant = "{variant}"
# account_id and secret are loaded from .env (CARRIER_ACCOUNT_ID, CARRIER_SECRET)
account_id = ""
secret = ""
{connection_id_line}caller_id = "{caller_id}"

[speech]
# api_key is loaded from .env (SPEECH_API_KEY)
api_key = ""
voice = "{voice}"

# [hold_music]
# file = "/path/to/hold-music.wav"
# volume = 0.3
"#,
        user_number = values.user_number,
        public_url_line = public_url_line,
        variant = values.variant,
        connection_id_line = connection_id_line,
        caller_id = values.caller_id,
        voice = values.voice,
    );

    let config_path = config_dir.join("config.toml");
    write_file(&config_path, &config_toml);

    let mut env_content = format!(
        "CARRIER_ACCOUNT_ID={}\nCARRIER_SECRET={}\nSPEECH_API_KEY={}\n",
        values.account_id, values.secret, values.speech_api_key
    );
    if let Some(token) = &values.tunnel_auth_token {
        env_content.push_str(&format!("TUNNEL_AUTH_TOKEN={token}\n"));
    }
    let env_path = config_dir.join(".env");
    write_file(&env_path, &env_content);
    restrict_permissions(&env_path);

    config_dir
}

fn write_file(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    println!("  \u{2713} {}", path.display());
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    let _ = std::fs::set_permissions(path, perms);
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Basic E.164 validation: starts with +, followed by digits only, 8-16 total chars.
fn validate_e164(s: &str) -> bool {
    if !s.starts_with('+') || s.len() < 8 || s.len() > 16 {
        return false;
    }
    s[1..].chars().all(|c| c.is_ascii_digit())
}

fn ask(prompt: &str, default: Option<&str>) -> String {
    match default {
        Some(d) if !d.is_empty() => print!("  {prompt} [{d}]: "),
        Some(_) => print!("  {prompt} (optional): "),
        None => print!("  {prompt}: "),
    }
    std::io::stdout().flush().ok();

    let mut input = String::new();
    std::io::stdin().read_line(&mut input).ok();
    let trimmed = input.trim();
    if trimmed.is_empty() {
        default.unwrap_or("").to_string()
    } else {
        trimmed.to_string()
    }
}

fn ask_secret(prompt: &str) -> String {
    rpassword::prompt_password(format!("  {prompt}: ")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_e164_numbers() {
        assert!(validate_e164("+15559876543"));
        assert!(!validate_e164("15559876543"));
        assert!(!validate_e164("+1"));
    }
}
