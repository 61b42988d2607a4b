//! Real Linux implementations of the twinjack collaborator traits.
//!
//! Everything here shells out to the standard tooling (`iptables`, `ip`,
//! `iw`, `nmcli`, `aireplay-ng`) or reads `/proc` and `/sys` directly, and
//! is kept deliberately thin: supervision, ordering, and cleanup policy all
//! live in `twinjack-core`.

pub mod deauth;
pub mod leases;
pub mod link;
pub mod probe;
pub mod process;
pub mod render;
pub mod rules;
pub mod wifi;

pub use deauth::AireplaySender;
pub use leases::LeaseClientResolver;
pub use link::IpLinkController;
pub use probe::IwCapabilityProbe;
pub use process::StdProcessRunner;
pub use render::SystemConfigWriter;
pub use rules::IptablesEngine;
pub use wifi::NmcliConnector;
