//! CLI entrypoint: load a service config, optionally just validate it,
//! and otherwise run the gateway's admin/metrics surface. Mirrors the
//! teacher's `agentgateway-app/src/main.rs` flag shape (`--file`,
//! `--validate-only`) adapted to this core's single-service config
//! instead of an XDS bootstrap document.

use std::path::PathBuf;

use clap::Parser;
use svc_control_gateway::app::Gateway;
use svc_control_gateway::telemetry::log::{Format, init_logging};

#[derive(Parser, Debug)]
#[command(version, about = "Service-Control gateway request-processing core")]
struct Args {
	/// Path to the service config YAML file.
	#[arg(long)]
	file: Option<PathBuf>,

	/// Parse and compile the config, then exit without starting the
	/// admin server.
	#[arg(long, default_value_t = false)]
	validate_only: bool,

	/// Address the `/metrics`/`/healthz` admin server binds to.
	#[arg(long, default_value = "0.0.0.0:15020")]
	admin_addr: std::net::SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	init_logging(Format::default());

	let contents = match &args.file {
		Some(path) => fs_err::tokio::read_to_string(path).await?,
		None => "{}".to_string(),
	};

	if args.validate_only {
		let service = svc_control_gateway::config::ServiceConfig::parse(&contents)?;
		service.compile()?;
		println!("config OK");
		return Ok(());
	}

	let (gateway, registry) = Gateway::new(&contents).await?;
	let (router, readiness) = svc_control_gateway::management::router(registry);
	*readiness.lock().expect("readiness mutex poisoned") = svc_control_gateway::management::Readiness::Ready;

	// Keep the gateway alive for the admin server's lifetime; a real
	// proxy runtime would hold this alongside its own request loop and
	// call `gateway.new_request_handler()` per request.
	let _gateway = gateway;
	svc_control_gateway::management::serve(args.admin_addr, router).await
}
