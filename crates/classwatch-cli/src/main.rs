use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "classwatch", about = "Classwatch attendance CLI")]
struct Cli {
    /// Base URL of a running classwatchd
    #[arg(long, env = "CLASSWATCH_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// List registered students
    Students {
        /// Only students of this class
        #[arg(long = "class")]
        class_name: Option<String>,
    },
    /// List active class schedules
    Classes,
    /// Add a class schedule
    AddClass {
        #[arg(long)]
        name: String,
        /// Start time, HH:MM
        #[arg(long)]
        start: String,
        /// End time, HH:MM
        #[arg(long)]
        end: String,
        /// "Daily" or a weekday name
        #[arg(long, default_value = "Daily")]
        day: String,
    },
    /// Today's roster for a class
    Today { class_name: String },
    /// Present/absent statistics
    Stats {
        #[arg(long = "class")]
        class_name: Option<String>,
        /// Single day, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },
    /// Attendance efficiency, for one student or everyone
    Efficiency {
        #[arg(long = "class")]
        class_name: Option<String>,
        #[arg(long)]
        roll: Option<String>,
    },
    /// Classes with an open monitoring window
    Monitor,
    /// Show daemon status
    Status,
}

struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    fn new(server: &str) -> Self {
        Self {
            base: server.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<Value> {
        let query: Vec<(&str, &str)> = query
            .iter()
            .filter_map(|(k, v)| v.map(|v| (*k, v)))
            .collect();
        let url = self.url(path);
        tracing::debug!(%url, ?query, "GET");
        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("failed to reach classwatchd at {}", self.base))?;
        Self::decode(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach classwatchd at {}", self.base))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            match body.get("message").and_then(Value::as_str) {
                Some(message) => bail!("{status}: {error} ({message})"),
                None => bail!("{status}: {error}"),
            }
        }
        Ok(body)
    }
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    let value = match cli.command {
        Commands::Students { class_name } => {
            client
                .get("/api/students", &[("className", class_name.as_deref())])
                .await?
        }
        Commands::Classes => client.get("/api/classes", &[]).await?,
        Commands::AddClass {
            name,
            start,
            end,
            day,
        } => {
            client
                .post(
                    "/api/classes/add",
                    &json!({
                        "className": name,
                        "startTime": start,
                        "endTime": end,
                        "dayOfWeek": day,
                    }),
                )
                .await?
        }
        Commands::Today { class_name } => {
            client
                .get(&format!("/api/attendance/today/{class_name}"), &[])
                .await?
        }
        Commands::Stats { class_name, date } => {
            client
                .get(
                    "/api/attendance/stats",
                    &[("className", class_name.as_deref()), ("date", date.as_deref())],
                )
                .await?
        }
        Commands::Efficiency { class_name, roll } => match roll {
            Some(roll) => {
                client
                    .get(&format!("/api/efficiency/roll/{roll}"), &[])
                    .await?
            }
            None => {
                client
                    .get("/api/efficiency", &[("className", class_name.as_deref())])
                    .await?
            }
        },
        Commands::Monitor => client.get("/api/monitor", &[]).await?,
        Commands::Status => client.get("/health", &[]).await?,
    };

    print(&value)
}
