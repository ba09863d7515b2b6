mod demos;
mod logging;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use testbed_core::config::DatabaseConfig;
use testbed_core::conformance::run_conformance_suite;
use testbed_core::table::DataValue;
use testbed_core::{
    Configuration, Harness, RunOptions, State, SuiteLifecycle, SuiteReport, TestCase, TestSelector,
};
use testbed_sql::{
    memory_registry, MemoryServer, RelationalDefinitionBuilder, RelationalTableManager,
    RELATIONAL_TYPE_TAG,
};
use tracing::error;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Requirement-driven integration test runner.
#[derive(Parser)]
#[command(name = "testbed", version, about = "Requirement-driven integration test runner")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SuiteArgs {
    /// Path to a TOML suite configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Only tests with these names (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tests: Vec<String>,
    /// Only tests in at least one of these groups (comma-separated)
    #[arg(long, value_delimiter = ',')]
    groups: Vec<String>,
    /// Skip tests in any of these groups (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_groups: Vec<String>,
}

impl SuiteArgs {
    fn selector(&self) -> TestSelector {
        let set = |values: &[String]| values.iter().cloned().collect::<BTreeSet<_>>();
        TestSelector {
            tests: set(&self.tests),
            groups: set(&self.groups),
            excluded_groups: set(&self.exclude_groups),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo suite against in-memory databases
    Run {
        #[command(flatten)]
        suite: SuiteArgs,
        /// Worker threads for the test phase
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// List the expanded test invocations without running them
    List {
        #[command(flatten)]
        suite: SuiteArgs,
    },

    /// Run the table manager conformance checks against the relational manager
    Conformance,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.quiet);

    match cli.command {
        Commands::Run { suite, threads } => cmd_run(&suite, threads, cli.output, cli.quiet),
        Commands::List { suite } => cmd_list(&suite, cli.output, cli.quiet),
        Commands::Conformance => cmd_conformance(cli.output, cli.quiet),
    }
}

/// The configuration used when no `--config` is given: one relational
/// database named `memory`.
fn default_config() -> Configuration {
    Configuration::default().with_database("memory", DatabaseConfig::with_type(RELATIONAL_TYPE_TAG))
}

fn load_config(path: Option<&Path>) -> Result<Configuration, String> {
    let Some(path) = path else {
        return Ok(default_config());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading config '{}': {}", path.display(), e))?;
    Configuration::from_toml_str(&text)
        .map_err(|e| format!("error parsing config '{}': {}", path.display(), e))
}

fn harness(config: Configuration, server: &MemoryServer) -> Harness {
    let bound = server.clone();
    Harness::new(
        SuiteLifecycle::builder(config)
            .table_managers(memory_registry(server))
            .test_fulfiller(demos::SeedRowsFulfiller::registration())
            .bind_suite(move |_| vec![State::new(bound.clone())])
            .build(),
    )
}

/// Load config and demo cases, exiting on failure.
fn prepare(suite: &SuiteArgs, output: OutputFormat, quiet: bool) -> (Harness, Vec<TestCase>) {
    let config = match load_config(suite.config.as_deref()) {
        Ok(config) => config,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let cases = match demos::demo_cases() {
        Ok(cases) => cases,
        Err(e) => {
            report_error(&format!("error building demo suite: {e}"), output, quiet);
            process::exit(1);
        }
    };
    (harness(config, &MemoryServer::new()), cases)
}

fn cmd_run(suite: &SuiteArgs, threads: usize, output: OutputFormat, quiet: bool) {
    let (harness, cases) = prepare(suite, output, quiet);
    let options = RunOptions {
        threads,
        selector: suite.selector(),
    };
    let report = harness.run(cases, &options);
    if let Some(err) = &report.suite_error {
        error!("suite failed: {err}");
    }
    print_report(&report, output, quiet);
    if !report.is_success() {
        process::exit(1);
    }
}

fn print_report(report: &SuiteReport, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => report_error(&format!("serialization error: {e}"), output, quiet),
        },
        OutputFormat::Text if quiet => println!("{}", report.summary()),
        OutputFormat::Text => println!("{report}"),
    }
}

#[derive(Serialize)]
struct ListedTest {
    name: String,
    groups: Vec<String>,
    requirements: usize,
}

fn cmd_list(suite: &SuiteArgs, output: OutputFormat, quiet: bool) {
    let (harness, cases) = prepare(suite, output, quiet);
    let listed: Vec<ListedTest> = harness
        .plan(cases, &suite.selector())
        .iter()
        .map(|test| ListedTest {
            name: test.display_name(),
            groups: test.case().groups().iter().cloned().collect(),
            requirements: test.requirements().len(),
        })
        .collect();

    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(&listed) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                report_error(&format!("serialization error: {e}"), output, quiet);
                process::exit(1);
            }
        },
        OutputFormat::Text => {
            for test in &listed {
                if test.groups.is_empty() {
                    println!("{} ({} requirements)", test.name, test.requirements);
                } else {
                    println!(
                        "{} [{}] ({} requirements)",
                        test.name,
                        test.groups.join(", "),
                        test.requirements
                    );
                }
            }
            if !quiet {
                println!("{} tests", listed.len());
            }
        }
    }
}

fn cmd_conformance(output: OutputFormat, quiet: bool) {
    let definition = match RelationalDefinitionBuilder::new("conformance_probe")
        .create_template("CREATE TABLE %NAME% (id BIGINT, label VARCHAR(10))")
        .row([DataValue::Int(1), DataValue::from("one")])
        .build()
    {
        Ok(definition) => Arc::new(definition),
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    let server = MemoryServer::new();
    let report = run_conformance_suite(
        || RelationalTableManager::new("memory", Box::new(server.connect("memory"))),
        definition,
    );

    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => report_error(&format!("serialization error: {e}"), output, quiet),
        },
        OutputFormat::Text => print!("{report}"),
    }
    if report.failed > 0 {
        process::exit(1);
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
