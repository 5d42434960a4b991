pub mod bundle;
pub mod cl;
pub mod config;
pub mod contact;
pub mod daemon;
pub mod eid;
pub mod graph;
pub mod link;
pub mod registration;
pub mod router;
pub mod sdnv;
pub mod store;
pub mod types;

pub use bundle::{Bundle, BundleParser, FragmentManager, Payload, StatusReason, StatusReport};
pub use config::{Config, LinkConfig, RouteConfig, RouterType, WeightFnKind};
pub use contact::{Contact, ContactManager};
pub use daemon::{ContactDownReason, Daemon, Event, EventQueue, EventSender};
pub use eid::{EidPattern, EndpointId};
pub use graph::MultiGraph;
pub use link::{BundleQueue, Link, LinkParams, LinkState, LinkType};
pub use registration::{FailureAction, RegistrationTable};
pub use router::{RouteTable, Router};
pub use store::{BundleStore, StorageType};
pub use types::{BundleId, CreationTimestamp, Priority};
