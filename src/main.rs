mod annotate;
mod app;
mod auth;
mod config;
mod gateway;
mod gemini;
mod markdown;
mod parser;
mod prompts;
mod refresh;
mod session;
mod tui;
mod ui;
mod webui;

use anyhow::{Result, bail};
use app::App;
use auth::{AuthState, EnvCredentials, SelectedCredential};
use clap::Parser;
use config::AppConfig;
use gateway::ImagePayload;
use session::Session;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "chartlens_tui=info";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ChartLens-TUI: AI chart-screenshot analysis terminal backed by Gemini",
    after_help = "EXAMPLES:
    # Interactive terminal UI
    cargo run --release

    # Analyze one screenshot for NVDA and print the report
    cargo run --release -- --symbol NVDA --analyze ./chart.png

    # Print the market index board
    cargo run --release -- --indices

    # Launch the browser UI
    cargo run --release -- --webui --webui-port 8080"
)]
struct Args {
    /// Launch in WebUI mode
    #[arg(long)]
    webui: bool,

    /// WebUI server port
    #[arg(long, default_value_t = 8080)]
    webui_port: u16,

    /// Symbol under analysis (overrides CHARTLENS_DEFAULT_SYMBOL)
    #[arg(long)]
    symbol: Option<String>,

    /// Analyze a chart screenshot once and print the result
    #[arg(long, value_name = "IMAGE")]
    analyze: Option<PathBuf>,

    /// Fetch the index board once and print it
    #[arg(long)]
    indices: bool,

    /// Ask one question about the symbol and print the reply
    #[arg(long, value_name = "QUESTION")]
    ask: Option<String>,
}

impl Args {
    fn one_shot(&self) -> bool {
        self.analyze.is_some() || self.indices || self.ask.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let interactive = !args.webui && !args.one_shot();
    init_logging(interactive)?;

    let mut config = AppConfig::from_env();
    if let Some(symbol) = args.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        config.default_symbol = symbol.to_uppercase();
    }
    config.auto_refresh = !args.one_shot();

    let credentials = Arc::new(SelectedCredential::new(EnvCredentials::new(config.key_vars.clone())));
    let session = Session::from_config(config, credentials.clone())?;

    if args.webui {
        match webui::run_webui_server(args.webui_port, session, credentials).await {
            Ok(_) => info!("WebUI exited."),
            Err(e) => error!("WebUI failed: {}", e),
        }
        return Ok(());
    }

    if args.one_shot() {
        let result = run_one_shot(&args, &session).await;
        session.shutdown().await;
        return result;
    }

    let mut terminal = tui::init()?;
    let mut app = App::new(session, credentials).await;
    let res = app.run(&mut terminal).await;

    tui::restore()?;

    if let Err(e) = res {
        error!("Error: {:?}", e);
    }

    Ok(())
}

/// Terminal mode owns the screen, so logs go to `CHARTLENS_LOG_FILE` or nowhere.
fn init_logging(interactive: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    if !interactive {
        builder.init();
        return Ok(());
    }

    match std::env::var_os("CHARTLENS_LOG_FILE") {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::sink).init(),
    }
    Ok(())
}

async fn run_one_shot(args: &Args, session: &Session) -> Result<()> {
    if session.check_auth().await != AuthState::Authorized {
        bail!("No usable API key. Set GEMINI_API_KEY (or API_KEY) and retry.");
    }

    if args.indices {
        let quotes = session.refresh_indices().await?;
        if quotes.is_empty() {
            println!("No index data available right now.");
        }
        for quote in quotes {
            let arrow = if quote.is_up() { "▲" } else { "▼" };
            println!("{:<24} {} {:+.2} ({})", quote.name, arrow, quote.change, quote.percent);
        }
    }

    if let Some(path) = &args.analyze {
        let image = ImagePayload::from_path(path).await?;
        let symbol = session.symbol().await;
        info!("Analyzing {} for {}", path.display(), symbol);
        let result = session.analyze_image(image).await?;
        println!("== {} ==", symbol);
        println!("{}\n", annotate::strip_markup(&result.summary));
        println!("{}", annotate::strip_markup(&result.analysis));
    }

    if let Some(question) = &args.ask {
        let reply = session.send_chat(question).await?;
        println!("{}", reply);
    }

    Ok(())
}
