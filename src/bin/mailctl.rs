//! Operator tool for the mail dispatch service

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mail_dispatch::config::Config;
use mail_dispatch::events::{spawn_event_logger, EventBus};
use mail_dispatch::mail::build_transport;
use mail_dispatch::mail::template::{TemplateData, TeraRenderer};
use mail_dispatch::pipeline::SendPipeline;
use mail_dispatch::rate_limit::RateLimiter;
use mail_dispatch::stats::{format_seconds, StatsReporter};
use mail_dispatch::validation::AddressValidator;

const WATCH_INTERVAL: Duration = Duration::from_secs(5);
const TEST_TEMPLATE: &str = "emails.test";
const TEST_TEMPLATE_FALLBACK: &str = "<h1>Test Email</h1>\n<p>{{ content }}</p>";

/// Command-line utility for the mail dispatch service
#[derive(Parser, Debug)]
#[command(name = "mailctl")]
#[command(about = "Inspect and exercise the mail dispatch service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show mail configuration and rate limit usage
    Status {
        /// Reset the rate limit counter
        #[arg(long)]
        reset: bool,

        /// Refresh the status every 5 seconds
        #[arg(long)]
        watch: bool,
    },
    /// Send a test message to verify the mail configuration
    Test {
        /// Recipient address (prompted for when omitted)
        to: Option<String>,

        /// Render the test template instead of sending raw content
        #[arg(long)]
        template: bool,

        #[arg(long, default_value = "Test Email")]
        subject: String,

        #[arg(long, default_value = "Test content")]
        content: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let rate_limiter = RateLimiter::from_config(&config)?;

    match cli.command {
        Commands::Status { reset: true, .. } => {
            rate_limiter.reset().await?;
            println!("✓ Rate limit counters reset");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { watch: true, .. } => {
            watch_status(&config, &StatsReporter::new(rate_limiter)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { .. } => {
            show_status(&config, &StatsReporter::new(rate_limiter)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Test {
            to,
            template,
            subject,
            content,
        } => send_test(&config, rate_limiter, to, template, subject, content).await,
    }
}

fn mail_config_table(config: &Config, header: [&str; 2], env_names: bool) -> Table {
    let rows = [
        ("MAIL_MAILER", "Mailer", config.mail_mailer.to_string()),
        ("MAIL_HOST", "Host", config.smtp_host.clone()),
        ("MAIL_PORT", "Port", config.smtp_port.to_string()),
        ("MAIL_ENCRYPTION", "Encryption", config.smtp_encryption.to_string()),
        ("MAIL_FROM_ADDRESS", "From Address", config.mail_from_address.clone()),
        ("QUEUE_CONNECTION", "Queue", config.queue_connection.clone()),
    ];

    let mut table = Table::new();
    table.set_header(header.to_vec());
    for (env, label, value) in rows {
        table.add_row(vec![if env_names { env } else { label }.to_string(), value]);
    }
    table
}

async fn show_status(config: &Config, reporter: &StatsReporter) -> anyhow::Result<()> {
    let snapshot = reporter.snapshot().await?;

    println!("Mail Service Status\n");
    println!("{}\n", mail_config_table(config, ["SMTP Configuration", "Value"], false));

    println!("Send Limits");
    let mut limits = Table::new();
    limits.set_header(vec!["Metric", "Value"]);
    limits.add_row(vec![
        "Emails sent (current window)".to_string(),
        snapshot.current.to_string(),
    ]);
    limits.add_row(vec!["Maximum per window".to_string(), snapshot.max.to_string()]);
    limits.add_row(vec![
        "Time until reset".to_string(),
        format_seconds(snapshot.reset_in),
    ]);
    limits.add_row(vec![
        "Percent used".to_string(),
        format!("{}%", snapshot.percent_used),
    ]);
    println!("{}", limits);

    Ok(())
}

async fn watch_status(config: &Config, reporter: &StatsReporter) -> anyhow::Result<()> {
    println!("Watching mail service status (Ctrl+C to exit)\n");
    let mut ticker = tokio::time::interval(WATCH_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                print!("\x1b[H\x1b[2J");
                show_status(config, reporter).await?;
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn prompt(question: &str) -> io::Result<String> {
    print!("{} ", question);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn send_test(
    config: &Config,
    rate_limiter: RateLimiter,
    to: Option<String>,
    use_template: bool,
    subject: String,
    content: String,
) -> anyhow::Result<ExitCode> {
    let to = match to {
        Some(to) => to,
        None => prompt("Enter the destination address:")?,
    };

    if !AddressValidator::new().is_valid(&to) {
        eprintln!("The email address is not valid.");
        return Ok(ExitCode::FAILURE);
    }

    println!("Sending test email...\n");
    println!("{}\n", mail_config_table(config, ["Setting", "Value"], true));

    let mut renderer = TeraRenderer::from_dir(&config.template_dir)?;
    if !renderer.has_template(TEST_TEMPLATE) {
        renderer.add_raw_template(TEST_TEMPLATE, TEST_TEMPLATE_FALLBACK)?;
    }

    let events = EventBus::new();
    let _event_logger = spawn_event_logger(&events);
    let pipeline = SendPipeline::from_config(
        config,
        rate_limiter,
        build_transport(config)?,
        Arc::new(renderer),
        events,
    );

    let outcome = if use_template {
        let mut data = TemplateData::new();
        data.insert("content".to_string(), Value::String(content));
        pipeline
            .send_template(&to, &subject, TEST_TEMPLATE, data, Vec::new())
            .await
    } else {
        pipeline.send_html(&to, &subject, &content, Vec::new()).await
    };

    if outcome.success {
        println!("✓ Email sent successfully");
        Ok(ExitCode::SUCCESS)
    } else {
        match outcome.error {
            Some(error) => eprintln!("✗ Failed to send email: {}", error),
            None => eprintln!("✗ Failed to send email"),
        }
        Ok(ExitCode::FAILURE)
    }
}
