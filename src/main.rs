//! caravan — a store-and-forward bundle agent for delay-tolerant
//! networks.

use caravan::config::{Config, LinkConfig, RouteConfig, RouterType, WeightFnKind};
use caravan::daemon::Daemon;
use caravan::eid::EndpointId;
use caravan::link::LinkType;
use caravan::store::StorageType;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "caravan", version, about = "caravan: DTN bundle agent")]
struct Args {
    /// Endpoint id of this node, e.g. dtn://relay.dtn
    #[arg(short, long, default_value = "dtn://localhost.dtn")]
    local_eid: String,

    /// Listen address for the TCP convergence layer
    #[arg(short = 'L', long, default_value = "0.0.0.0:4556")]
    listen: SocketAddr,

    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Storage backend: memorydb, filesysdb
    #[arg(short, long, default_value = "filesysdb")]
    storage: String,

    /// Router: static, dtlsr
    #[arg(short, long, default_value = "static")]
    router: String,

    /// DTLSR edge weight function: cost, delay, estimated_delay
    #[arg(long, default_value = "cost")]
    weight_fn: String,

    /// Links as name,type,eid,addr (repeatable), e.g.
    /// peer0,ondemand,dtn://b.dtn,10.0.0.2:4556
    #[arg(long = "link")]
    links: Vec<String>,

    /// Static routes as pattern=link (repeatable), e.g.
    /// dtn://b.dtn/*=peer0
    #[arg(long = "route")]
    routes: Vec<String>,

    /// Keepalive interval in seconds
    #[arg(long, default_value = "10")]
    keepalive: u16,

    /// Disable reactive fragmentation
    #[arg(long)]
    no_reactive_frag: bool,
}

fn parse_link(spec: &str) -> Result<LinkConfig, String> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("bad link spec (want name,type,eid,addr): {}", spec));
    }
    Ok(LinkConfig {
        name: parts[0].to_string(),
        link_type: parts[1].parse::<LinkType>()?,
        remote_eid: EndpointId::parse(parts[2]).map_err(|e| e.to_string())?,
        remote_addr: parts[3]
            .parse()
            .map_err(|e| format!("bad address {}: {}", parts[3], e))?,
    })
}

fn parse_route(spec: &str) -> Result<RouteConfig, String> {
    let (pattern, link) = spec
        .split_once('=')
        .ok_or_else(|| format!("bad route spec (want pattern=link): {}", spec))?;
    Ok(RouteConfig {
        pattern: pattern.to_string(),
        link: link.to_string(),
    })
}

fn build_config(args: &Args) -> Result<Config, String> {
    let mut config = Config {
        local_eid: EndpointId::parse(&args.local_eid).map_err(|e| e.to_string())?,
        storage_type: args.storage.parse::<StorageType>()?,
        data_dir: args.data_dir.clone(),
        router_type: args.router.parse::<RouterType>()?,
        listen_addr: args.listen,
        keepalive_interval: args.keepalive,
        reactive_frag_enabled: !args.no_reactive_frag,
        weight_fn: args.weight_fn.parse::<WeightFnKind>()?,
        ..Config::default()
    };
    for spec in &args.links {
        config.links.push(parse_link(spec)?);
    }
    for spec in &args.routes {
        config.static_routes.push(parse_route(spec)?);
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("caravan=info".parse().expect("valid directive")),
        )
        .init();

    let args = Args::parse();
    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("bad configuration: {}", e);
            return;
        }
    };

    info!("caravan v{} | local eid {}", VERSION, config.local_eid);
    info!(
        "listening on {} | router {:?} | storage {:?}",
        config.listen_addr, config.router_type, config.storage_type
    );

    let mut daemon = match Daemon::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!("failed to start: {}", e);
            return;
        }
    };
    let events = daemon.events();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupt; shutting down");
        events.post(caravan::daemon::Event::ShutdownRequest);
    });

    daemon.run().await;
}
