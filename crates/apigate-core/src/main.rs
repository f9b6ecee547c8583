//! `apigate` command line: check, plan and simulate gateway configurations

use anyhow::Context;
use apigate_core::{
    Gateway, GatewayConfig, GatewayRequest, GatewayResponse, PlanCompiler, StaticBackend,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use http::StatusCode;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Gateway configuration file (.yaml, .yml or .toml)")
}

fn cli() -> Command {
    Command::new("apigate")
        .version(apigate_core::VERSION)
        .about("Policy-driven request/response pipeline")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a configuration and compile its plans")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("plan")
                .about("Show compiled execution plans")
                .arg(config_arg())
                .arg(
                    Arg::new("route")
                        .long("route")
                        .help("Only show the plan for this route"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive requests through a route against a fixed backend response")
                .arg(config_arg())
                .arg(
                    Arg::new("route")
                        .long("route")
                        .required(true)
                        .help("Route to call"),
                )
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("10")
                        .value_parser(value_parser!(u32))
                        .help("Number of requests to send"),
                )
                .arg(
                    Arg::new("status")
                        .long("status")
                        .default_value("200")
                        .value_parser(value_parser!(u16))
                        .help("Status the backend answers with"),
                )
                .arg(
                    Arg::new("subscription-key")
                        .long("subscription-key")
                        .help("Subscription key sent with each request"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(matches: &ArgMatches) -> anyhow::Result<GatewayConfig> {
    let path = matches
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    GatewayConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("check", sub)) => {
            let config = load(sub)?;
            let plans = PlanCompiler::new(&config).compile()?;
            println!("configuration ok: {} routes", plans.len());
            for route in plans.keys() {
                println!("  {route}");
            }
        }
        Some(("plan", sub)) => {
            let config = load(sub)?;
            let plans = PlanCompiler::new(&config).compile()?;
            let descriptions = match sub.get_one::<String>("route") {
                Some(route) => {
                    let plan = plans
                        .get(route)
                        .with_context(|| format!("no plan for route {route}"))?;
                    vec![plan.describe()]
                }
                None => plans.values().map(|plan| plan.describe()).collect(),
            };

            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&descriptions)?);
            } else {
                for description in &descriptions {
                    println!("{description}");
                }
            }
        }
        Some(("simulate", sub)) => simulate(sub).await?,
        _ => anyhow::bail!("unknown subcommand"),
    }
    Ok(())
}

async fn simulate(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load(matches)?;
    let route = matches
        .get_one::<String>("route")
        .context("--route is required")?;
    let requests = matches.get_one::<u32>("requests").copied().unwrap_or(10);
    let status = matches.get_one::<u16>("status").copied().unwrap_or(200);
    let status = StatusCode::from_u16(status).with_context(|| format!("invalid status {status}"))?;
    let header = config.settings.subscription_header.clone();

    let backend = StaticBackend::new(GatewayResponse::new(status).with_body("simulated"));
    let gateway = Gateway::builder(config)
        .with_default_backend(Arc::new(backend))
        .build()?;
    let janitor = gateway.start_janitor();

    let mut tally: BTreeMap<u16, u32> = BTreeMap::new();
    for i in 1..=requests {
        let mut request = GatewayRequest::get(route.as_str());
        if let Some(key) = matches.get_one::<String>("subscription-key") {
            request.headers.insert(
                http::header::HeaderName::from_bytes(header.as_bytes())?,
                http::header::HeaderValue::from_str(key)?,
            );
        }
        let response = gateway.process(request).await;
        *tally.entry(response.status.as_u16()).or_default() += 1;

        let quota = response
            .header("x-ratelimit-remaining")
            .map(|remaining| format!(" remaining={remaining}"))
            .unwrap_or_default();
        let retry = response
            .header("retry-after")
            .map(|secs| format!(" retry-after={secs}"))
            .unwrap_or_default();
        println!("#{i:<4} {}{quota}{retry}", response.status);
    }

    janitor.abort();

    println!("summary:");
    for (status, count) in tally {
        println!("  {status}: {count}");
    }
    Ok(())
}
