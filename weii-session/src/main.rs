mod hooks;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::eyre;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use weii_core::{Balance, BalanceMetrics, DisplayUnit, Heavier, MetricsEngine};
use weii_session::{
    CollectorState, Config, LinkChannel, LinkConfig, MockBoard, MockBoardConfig, OutputConfig,
    Session, StreamLink, start_trigger,
};

#[derive(Parser)]
#[command(name = "weii")]
#[command(about = "Weigh yourself with a balance board")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "weii.toml")]
    config: PathBuf,

    /// Unit to print weights in (kg or lb)
    #[arg(short, long)]
    units: Option<DisplayUnit>,

    /// Number of samples to average
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Kilograms to add to the reported total, e.g. -1.5 for clothing
    #[arg(short, long, allow_hyphen_values = true)]
    adjust: Option<f64>,

    /// Print only the total weight
    #[arg(short, long)]
    weight_only: bool,

    /// Command to run when done; `{weight}` is replaced with the weight in kg
    #[arg(short, long)]
    command: Option<String>,

    /// Bluetooth address of the board to disconnect when done
    #[arg(short, long, value_name = "ADDRESS")]
    disconnect_when_done: Option<String>,

    /// Use a simulated board
    #[arg(long)]
    fake: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "weii=info,weii_session=info,weii_core=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };
    apply_overrides(&mut config, cli);

    if let Some(address) = &config.output.disconnect_address {
        if !hooks::is_valid_address(address) {
            return Err(eyre!("invalid bluetooth address '{address}'"));
        }
    }

    match config.link.clone() {
        LinkConfig::Device { path, hidraw } => {
            info!(path = %path.display(), "Connecting to board");
            let link = StreamLink::open(&path, hidraw).await?;
            measure(link, config).await
        }
        LinkConfig::Mock {
            weight_kg,
            step_on_after_ms,
            report_interval_ms,
            noise_kg,
            seed,
        } => {
            info!(weight_kg, "Using simulated board");
            let link = MockBoard::new(MockBoardConfig {
                weight_kg,
                step_on_after: Duration::from_millis(step_on_after_ms),
                step_off_after: None,
                report_interval: Duration::from_millis(report_interval_ms),
                noise_kg,
                seed,
            });
            measure(link, config).await
        }
    }
}

fn apply_overrides(config: &mut Config, cli: Cli) {
    if let Some(unit) = cli.units {
        config.output.unit = unit;
    }
    if let Some(samples) = cli.samples {
        config.session.sample_count = samples;
    }
    if let Some(adjust) = cli.adjust {
        config.output.adjust_kg = adjust;
    }
    if cli.weight_only {
        config.output.weight_only = true;
    }
    if cli.command.is_some() {
        config.output.command = cli.command;
    }
    if cli.disconnect_when_done.is_some() {
        config.output.disconnect_address = cli.disconnect_when_done;
    }
    if cli.fake {
        let mock = MockBoardConfig::default();
        config.link = LinkConfig::Mock {
            weight_kg: mock.weight_kg,
            step_on_after_ms: mock.step_on_after.as_millis() as u64,
            report_interval_ms: mock.report_interval.as_millis() as u64,
            noise_kg: mock.noise_kg,
            seed: mock.seed,
        };
    }
}

async fn measure<L: LinkChannel>(link: L, config: Config) -> color_eyre::Result<()> {
    let session = Session::new(link, config.session.clone())?;
    let quiet = config.output.weight_only;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping session");
                cancel.cancel();
            }
        }
    });

    let (trigger, signal) = start_trigger();
    // a blocking stdin read would keep the runtime from shutting down
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            trigger.fire();
        }
    });

    let mut states = session.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if !quiet {
                prompt(state);
            }
        }
    });

    let measurement = session.run(signal, cancel).await?;

    let metrics = MetricsEngine::new(config.output.unit)
        .with_adjustment(config.output.adjust_kg)
        .compute(&measurement);
    print_metrics(&metrics, &config.output);

    if let Some(command) = &config.output.command {
        let weight_kg = hooks::command_weight_kg(&measurement, config.output.adjust_kg);
        if let Err(e) = hooks::run_command(command, weight_kg).await {
            warn!(error = %e, "Post-measurement command failed");
        }
    }
    if let Some(address) = &config.output.disconnect_address {
        hooks::disconnect(address).await?;
    }

    Ok(())
}

fn prompt(state: CollectorState) {
    match state {
        CollectorState::ArmedWaitingForStart => eprintln!("Press Enter when ready."),
        CollectorState::WaitingForLoad => eprintln!("Step on the board."),
        CollectorState::Collecting => eprintln!("Measuring, hold still..."),
        _ => {}
    }
}

fn print_metrics(metrics: &BalanceMetrics, output: &OutputConfig) {
    let unit = metrics.unit.symbol();

    if output.weight_only {
        println!("{:.1}", metrics.total);
        return;
    }

    println!("Weight: {:.1} {unit}", metrics.total);
    println!(
        "Left/right: {:.1} / {:.1} {unit}, {}",
        metrics.left,
        metrics.right,
        describe(&metrics.side, unit),
    );
    println!(
        "Front/back: {:.1} / {:.1} {unit}, {}",
        metrics.front,
        metrics.back,
        describe(&metrics.end, unit),
    );
}

fn describe(balance: &Balance, unit: &str) -> String {
    let mut text = match balance.heavier {
        Heavier::Even => "even".to_owned(),
        heavier => format!("{heavier} heavier by {:.1} {unit}", balance.delta),
    };
    if let Some(percent) = balance.percent {
        text.push_str(&format!(" ({percent:.1}%)"));
    }
    text
}
