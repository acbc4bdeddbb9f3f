//! Sign-in diagnostic for the portal
//!
//! Reads PORTAL_URL (and PORTAL_PUBLIC_KEY, if the server enforces it) from
//! ./.env, attempts one sign-in and one role read, and prints both raw.
//! Run: cargo run --bin test_login -- <email> <password>
//!
//! Exit codes: 2 usage/config problem, 1 runtime error, 0 otherwise.

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::ExitCode;

struct Target {
    url: String,
    api_key: Option<String>,
}

fn read_env_file() -> Result<Target, String> {
    let path = std::env::current_dir()
        .map_err(|e| e.to_string())?
        .join(".env");
    let entries = dotenvy::from_path_iter(&path).map_err(|_| {
        ".env not found in project root. Please ensure PORTAL_URL is present.".to_string()
    })?;
    let values: HashMap<String, String> = entries.filter_map(|entry| entry.ok()).collect();

    let url = values
        .get("PORTAL_URL")
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| "Missing PORTAL_URL in .env".to_string())?;
    let api_key = values
        .get("PORTAL_PUBLIC_KEY")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    Ok(Target { url, api_key })
}

fn with_key(req: RequestBuilder, key: &Option<String>) -> RequestBuilder {
    match key {
        Some(key) => req.header("apikey", key),
        None => req,
    }
}

fn raw_json(res: reqwest::blocking::Response) -> Result<Value, reqwest::Error> {
    let status = res.status().as_u16();
    let text = res.text()?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(json!({ "status": status, "body": body }))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn run(target: &Target, email: &str, password: &str) -> Result<(), reqwest::Error> {
    let client = Client::new();

    println!("Attempting sign-in for: {}", email);
    let sign_in = raw_json(
        with_key(client.post(format!("{}/login", target.url)), &target.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()?,
    )?;
    println!("\n--- signIn response ---");
    println!("{}", pretty(&sign_in));

    println!("\n--- role read (/me) ---");
    match sign_in["body"]["token"].as_str() {
        Some(token) => {
            let me = raw_json(
                with_key(client.get(format!("{}/me", target.url)), &target.api_key)
                    .bearer_auth(token)
                    .send()?,
            )?;
            println!("{}", pretty(&me));
        }
        None => println!("{}", pretty(&json!({ "data": null, "error": "not signed in" }))),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [email, password] = args.as_slice() else {
        eprintln!("Usage: test_login <email> <password>");
        return ExitCode::from(2);
    };

    let target = match read_env_file() {
        Ok(target) => target,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    match run(&target, email, password) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            ExitCode::from(1)
        }
    }
}
