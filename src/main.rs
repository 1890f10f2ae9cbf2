mod config;
mod connection;
mod handlers;
mod reporter;
mod request;
mod response;
mod server;
mod templates;
mod validate;

use std::{io::Write, path::PathBuf};

use clap::Parser;

use log::{error, info};

use crate::reporter::{DebugMode, Diagnostics, ErrorReporter};

/// Renders request-matched templates as a CGI script or a FastCGI server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(long, env = "TMPL_CGI_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Check template syntax and exit
    #[arg(long)]
    syntax_check: bool,

    /// Show detailed error pages (also enabled by TMPL_CGI_DEBUG=true|yes|1)
    #[arg(long)]
    debug: bool,
}

struct StartupError {
    stage: &'static str,
    error: anyhow::Error,
}

trait StageContext<T> {
    fn stage(self, stage: &'static str) -> Result<T, StartupError>;
}

impl<T, E: Into<anyhow::Error>> StageContext<T> for Result<T, E> {
    fn stage(self, stage: &'static str) -> Result<T, StartupError> {
        self.map_err(|error| StartupError {
            stage,
            error: error.into(),
        })
    }
}

/// The CGI-framed page written for a failed startup, if any. Only the serving
/// path in debug mode gets one; a failed syntax check always exits non-zero.
fn startup_debug_report(
    startup_error: &StartupError,
    debug_mode: DebugMode,
    syntax_check: bool,
) -> Option<Vec<u8>> {
    if syntax_check || !debug_mode.enabled() {
        return None;
    }

    Some(ErrorReporter::debug_report_as_cgi(
        &Diagnostics::new()
            .with("Result", "Failed to start server")
            .with("Stage", startup_error.stage)
            .with("Error", format!("{:#}", startup_error.error)),
    ))
}

fn fatal_error(startup_error: StartupError, debug_mode: DebugMode, syntax_check: bool) -> ! {
    if let Some(report) = startup_debug_report(&startup_error, debug_mode, syntax_check) {
        // Let the web server show the failure as a page.
        let mut stdout = std::io::stdout();
        if let Err(err) = stdout.write_all(&report).and_then(|_| stdout.flush()) {
            error!("writing startup error report failed: {}", err);
        }
        std::process::exit(0);
    }

    error!("{} failed: {:#}", startup_error.stage, startup_error.error);
    std::process::exit(1)
}

async fn syntax_check(args: &Args) -> Result<(), StartupError> {
    let configuration = config::read_configuration(&args.config)
        .await
        .stage("Reading configuration")?;

    let loader = templates::FileTemplateLoader::new(config::templates_directory(&args.config));

    validate::validate_templates(
        &configuration,
        &loader,
        &mut templates::MiniJinjaEngine::new(),
    )
    .stage("Template validation")?;

    info!("All templates are valid!");

    Ok(())
}

async fn run(args: &Args, debug_mode: DebugMode) -> Result<(), StartupError> {
    let configuration = config::read_configuration(&args.config)
        .await
        .stage("Reading configuration")?;

    let handler = handlers::create_handler(&configuration, &args.config, debug_mode)
        .stage("Creating CGI server")?;

    if server::cgi::invoked_as_cgi() {
        server::cgi::serve(handler)
            .await
            .stage("Serving CGI request")?;
    } else {
        server::Server::new(handler, configuration.server_configuration())
            .run()
            .await
            .stage("Running FastCGI server")?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_nanos()
        .init();

    let args = Args::parse();

    let debug_mode = DebugMode::from_environment(args.debug);

    let result = if args.syntax_check {
        syntax_check(&args).await
    } else {
        run(&args, debug_mode).await
    };

    if let Err(startup_error) = result {
        fatal_error(startup_error, debug_mode, args.syntax_check);
    }
}
