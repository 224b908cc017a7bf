//! STAC Probe CLI
//!
//! Command-line interface for probing live STAC API deployments.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stac_probe::{
    ApiClient, CancelFlag, CheckRegistry, ConformanceClass, ProbeOptions, Report, RetryPolicy,
    RunOptions, SchemaRegistry, Severity,
};

#[derive(Parser)]
#[command(name = "stac-probe")]
#[command(about = "Probe a live STAC API deployment for specification conformance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conformance battery against a deployment
    Validate {
        /// Root URL of the deployment
        root_url: String,

        /// Suppress a conformance class (repeatable), e.g. --exclude transaction
        /// against a read-only deployment
        #[arg(long, value_name = "CLASS")]
        exclude: Vec<ConformanceClass>,

        /// Also exercise POST variants of the search scenarios
        #[arg(long)]
        post: bool,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Attempts per request for transient network failures
        #[arg(long, default_value_t = 3)]
        retries: u32,

        /// Worker threads for independent capabilities (0 = auto)
        #[arg(long, default_value_t = 0)]
        concurrency: usize,

        /// Upper bound on pagination walks
        #[arg(long, default_value_t = 10)]
        max_pages: usize,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Only show WARN and FAIL findings in text output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List the registered checks per conformance class
    Checks,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            root_url,
            exclude,
            post,
            timeout,
            retries,
            concurrency,
            max_pages,
            output,
            format,
            quiet,
        } => run_validate(ValidateArgs {
            root_url,
            exclude,
            post,
            timeout,
            retries,
            concurrency,
            max_pages,
            output,
            format,
            quiet,
        }),
        Commands::Checks => run_checks(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

struct ValidateArgs {
    root_url: String,
    exclude: Vec<ConformanceClass>,
    post: bool,
    timeout: u64,
    retries: u32,
    concurrency: usize,
    max_pages: usize,
    output: Option<PathBuf>,
    format: String,
    quiet: bool,
}

fn run_validate(args: ValidateArgs) -> Result<(), u8> {
    if args.format != "text" && args.format != "json" {
        eprintln!("Error: unknown format '{}': expected text or json", args.format);
        return Err(2);
    }

    let client = ApiClient::new(
        Duration::from_secs(args.timeout),
        RetryPolicy {
            max_attempts: args.retries.max(1),
            ..RetryPolicy::default()
        },
    )
    .map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    let schemas = SchemaRegistry::builtin().map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    let registry = CheckRegistry::v1();

    let opts = RunOptions {
        exclude: args.exclude,
        concurrency: args.concurrency,
        probe: ProbeOptions {
            post: args.post,
            max_pages: args.max_pages.max(1),
        },
    };

    let report = stac_probe::run(
        &client,
        &registry,
        &schemas,
        &args.root_url,
        &opts,
        &CancelFlag::new(),
    )
    .map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let rendered = if args.format == "json" {
        serde_json::to_string_pretty(&report).map_err(|e| {
            eprintln!("Error serializing report: {}", e);
            2u8
        })?
    } else {
        render_text(&report, args.quiet)
    };

    match args.output {
        Some(path) => {
            std::fs::write(&path, rendered).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => println!("{}", rendered),
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(1)
    }
}

fn severity_style(severity: Severity) -> (&'static str, &'static str) {
    match severity {
        Severity::Pass => ("\x1b[32m", "✓"),
        Severity::Warn => ("\x1b[33m", "⚠"),
        Severity::Fail => ("\x1b[31m", "✗"),
        Severity::Skip => ("\x1b[2m", "-"),
    }
}

fn render_text(report: &Report, quiet: bool) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Probing {} ...\n", report.root_url);

    for class in &report.classes {
        let visible = class.checks.iter().any(|c| {
            !quiet || matches!(c.status, Severity::Warn | Severity::Fail)
        });
        if !visible {
            continue;
        }
        let _ = writeln!(out, "{}", class.class);

        for check in &class.checks {
            if quiet && !matches!(check.status, Severity::Warn | Severity::Fail) {
                continue;
            }
            let (color, icon) = severity_style(check.status);
            let _ = writeln!(out, "  {}{}\x1b[0m {}", color, icon, check.rule);

            for finding in &check.findings {
                if quiet && !matches!(finding.severity, Severity::Warn | Severity::Fail) {
                    continue;
                }
                let (color, _) = severity_style(finding.severity);
                let _ = write!(
                    out,
                    "      {}{}\x1b[0m {}: {}",
                    color,
                    finding.severity.label(),
                    finding.rule,
                    finding.message
                );
                if let Some(context) = &finding.context {
                    let _ = write!(out, " [{}]", context);
                }
                let _ = writeln!(out);
            }
        }
    }

    let _ = writeln!(out);
    if report.is_ok() {
        let _ = write!(
            out,
            "\x1b[32m✓ {} checks run, findings: {} pass, {} warn, {} skip\x1b[0m",
            report.checks_run, report.passed, report.warnings, report.skipped
        );
    } else {
        let _ = write!(
            out,
            "\x1b[31m✗ {} checks run, findings: {} fail, {} pass, {} warn, {} skip\x1b[0m",
            report.checks_run, report.failed, report.passed, report.warnings, report.skipped
        );
    }
    out
}

fn run_checks() -> Result<(), u8> {
    let registry = CheckRegistry::v1();
    println!("Registered checks (registry {}):\n", registry.version());
    for class in registry.classes() {
        println!("{}", class);
        for check in registry.battery(&class) {
            println!("  {}", check.id);
        }
    }
    Ok(())
}
