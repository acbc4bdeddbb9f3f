use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;

const STATE_FILE: &str = ".m2h_session";

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "CLI for the M2H portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "PORTAL_URL", default_value = "http://localhost:11111")]
    url: String,

    /// Client key sent as the `apikey` header
    #[arg(long, env = "PORTAL_PUBLIC_KEY")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Whoami,
    Rooms {
        #[arg(short, long)]
        search: Option<String>,
        /// available, occupied, maintenance, reserved or all
        #[arg(long)]
        status: Option<String>,
    },
    Occupants {
        #[arg(short, long)]
        search: Option<String>,
        /// Only occupants without a room
        #[arg(long)]
        available: bool,
    },
    Assign {
        #[arg(short, long)]
        room: u64,
        #[arg(short, long)]
        occupant: u64,
    },
    Move {
        #[arg(short, long)]
        occupant: u64,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },
    Remove {
        #[arg(short, long)]
        room: u64,
    },
    Reports {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    SetStatus {
        #[arg(short, long)]
        report: u64,
        /// open, in_progress, resolved or rejected
        #[arg(long)]
        status: String,
    },
    /// Register occupants, each given as email,first,last
    Register {
        #[arg(required = true)]
        rows: Vec<String>,
    },
    FileReport {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        description: String,
        #[arg(long)]
        room: Option<u64>,
    },
    Finance,
    Analytics,
}

/// Persisted between invocations; removed on logout.
#[derive(Serialize, Deserialize, Default)]
struct SavedSession {
    token: String,
    email: String,
    role: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    email: String,
    role: Option<String>,
    dashboard: String,
}

fn load_session() -> SavedSession {
    fs::read_to_string(STATE_FILE)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

struct Api {
    client: Client,
    url: String,
    api_key: Option<String>,
    token: String,
}

impl Api {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.url, path))
            .bearer_auth(&self.token);
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }
        req
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }
}

async fn print_response(req: RequestBuilder) -> Result<(), Box<dyn std::error::Error>> {
    let res = req.send().await?;
    let status = res.status();
    let body = res.text().await?;
    let pretty = serde_json::from_str::<serde_json::Value>(&body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or(body);
    if status.is_success() {
        println!("{}", pretty);
    } else {
        println!("Request failed ({}): {}", status, pretty);
    }
    Ok(())
}

fn parse_row(raw: &str) -> Result<serde_json::Value, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [email, first, last] => Ok(json!({
            "email": email,
            "first_name": first,
            "last_name": last,
        })),
        _ => Err(format!("expected email,first,last but got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        url: cli.url.trim_end_matches('/').to_string(),
        api_key: cli.api_key,
        token: load_session().token,
    };

    match cli.command {
        Commands::Login { email, password } => {
            let mut req = api
                .client
                .post(format!("{}/login", api.url))
                .json(&json!({ "email": email, "password": password }));
            if let Some(key) = &api.api_key {
                req = req.header("apikey", key);
            }
            let res = req.send().await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                let saved = SavedSession {
                    token: body.token,
                    email: body.email,
                    role: body.role,
                };
                fs::write(STATE_FILE, serde_json::to_string(&saved)?)?;
                println!(
                    "Logged in as {} (role: {}). Dashboard: {}",
                    saved.email,
                    saved.role.as_deref().unwrap_or("none"),
                    body.dashboard
                );
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Logout => {
            if !api.token.is_empty() {
                // Close the backend session too; local state goes either way
                let _ = api.post("/logout").send().await;
            }
            let _ = fs::remove_file(STATE_FILE);
            println!("Logged out (session removed).");
        }
        Commands::Whoami => print_response(api.get("/me")).await?,
        Commands::Rooms { search, status } => {
            print_response(api.get("/rooms").query(&[("search", search), ("status", status)])).await?
        }
        Commands::Occupants { search, available } => {
            let req = if available {
                api.get("/occupants/available")
            } else {
                api.get("/occupants").query(&[("search", search)])
            };
            print_response(req).await?
        }
        Commands::Assign { room, occupant } => {
            print_response(
                api.post(&format!("/rooms/{}/assign", room))
                    .json(&json!({ "occupant_id": occupant })),
            )
            .await?
        }
        Commands::Move { occupant, from, to } => {
            print_response(
                api.post(&format!("/occupants/{}/move", occupant))
                    .json(&json!({ "from_room_id": from, "to_room_id": to })),
            )
            .await?
        }
        Commands::Remove { room } => {
            print_response(api.post(&format!("/rooms/{}/remove", room))).await?
        }
        Commands::Reports { search, status } => {
            print_response(api.get("/reports").query(&[("search", search), ("status", status)])).await?
        }
        Commands::SetStatus { report, status } => {
            print_response(
                api.request(reqwest::Method::PUT, &format!("/reports/{}/status", report))
                    .json(&json!({ "status": status })),
            )
            .await?
        }
        Commands::Register { rows } => {
            let occupants = rows
                .iter()
                .map(|r| parse_row(r))
                .collect::<Result<Vec<_>, _>>()?;
            print_response(api.post("/register").json(&json!({ "occupants": occupants }))).await?
        }
        Commands::FileReport { title, description, room } => {
            print_response(api.post("/reports").json(&json!({
                "title": title,
                "description": description,
                "room_id": room,
            })))
            .await?
        }
        Commands::Finance => print_response(api.get("/finance")).await?,
        Commands::Analytics => print_response(api.get("/analytics")).await?,
    }

    Ok(())
}
