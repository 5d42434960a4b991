//! Agent configuration
//!
//! One flat struct with defaults; `main` overrides fields from CLI
//! arguments. Durations are whole seconds throughout.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::eid::EndpointId;
use crate::link::LinkType;
use crate::store::StorageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterType {
    Static,
    Dtlsr,
}

impl std::str::FromStr for RouterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(RouterType::Static),
            "dtlsr" => Ok(RouterType::Dtlsr),
            other => Err(format!("unknown router type: {}", other)),
        }
    }
}

/// Which edge-weight function DTLSR's Dijkstra uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFnKind {
    Cost,
    Delay,
    EstimatedDelay,
}

impl std::str::FromStr for WeightFnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cost" => Ok(WeightFnKind::Cost),
            "delay" => Ok(WeightFnKind::Delay),
            "estimated_delay" => Ok(WeightFnKind::EstimatedDelay),
            other => Err(format!("unknown weight function: {}", other)),
        }
    }
}

/// A link declared up front in configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub name: String,
    pub link_type: LinkType,
    pub remote_eid: EndpointId,
    pub remote_addr: SocketAddr,
}

/// A static route-table entry.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub pattern: String,
    pub link: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub local_eid: EndpointId,
    pub storage_type: StorageType,
    pub data_dir: PathBuf,
    pub router_type: RouterType,

    pub listen_addr: SocketAddr,
    pub links: Vec<LinkConfig>,
    pub static_routes: Vec<RouteConfig>,

    // Link retry and idle behaviour.
    pub min_retry_interval: u64,
    pub max_retry_interval: u64,
    pub idle_close_time: u64,
    pub busy_queue_depth: usize,

    // Convergence-layer session parameters.
    pub keepalive_interval: u16,
    pub partial_ack_length: u64,
    pub reactive_frag_enabled: bool,
    /// Start the next bundle before the previous is fully acked.
    pub pipelining: bool,
    /// Fragment ahead of transmission when a bundle exceeds this
    /// payload size; zero disables proactive fragmentation.
    pub max_bundle_payload: u64,

    // DTLSR.
    pub lsa_interval: u64,
    pub min_lsa_interval: u64,
    pub lsa_lifetime: u64,
    pub weight_fn: WeightFnKind,
    pub weight_shift: u32,
    pub keep_down_links: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_eid: EndpointId::parse("dtn://localhost.dtn").expect("valid default eid"),
            storage_type: StorageType::MemoryDb,
            data_dir: PathBuf::from("./data"),
            router_type: RouterType::Static,
            listen_addr: "0.0.0.0:4556".parse().expect("valid default addr"),
            links: Vec::new(),
            static_routes: Vec::new(),
            min_retry_interval: 5,
            max_retry_interval: 600,
            idle_close_time: 30,
            busy_queue_depth: 10,
            keepalive_interval: 10,
            partial_ack_length: 1024,
            reactive_frag_enabled: true,
            pipelining: true,
            max_bundle_payload: 0,
            lsa_interval: 60,
            min_lsa_interval: 5,
            lsa_lifetime: 3600,
            weight_fn: WeightFnKind::Cost,
            weight_shift: 0,
            keep_down_links: true,
        }
    }
}

impl Config {
    pub fn link_params(&self) -> crate::link::LinkParams {
        crate::link::LinkParams {
            min_retry_interval: self.min_retry_interval,
            max_retry_interval: self.max_retry_interval,
            idle_close_time: self.idle_close_time,
            busy_queue_depth: self.busy_queue_depth,
            prevhop_hdr: true,
        }
    }
}
