//! Session orchestration core for twinjack.
//!
//! This crate owns the lifecycle of a rogue access point session: interface
//! allocation, supervision of the external AP and DHCP/DNS services, traffic
//! redirection, the deauthentication loop, credential capture bookkeeping,
//! optional credential verification, and the cleanup stack that unwinds all
//! of it deterministically.
//!
//! Everything that touches the host system goes through the traits in
//! [`runner`], so the whole orchestrator can be exercised with fakes that
//! never spawn a process or install a firewall rule. Real Linux
//! implementations live in `twinjack-system`; the capture HTTP server lives
//! in `twinjack-portal`.

pub mod alloc;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod deauth;
pub mod error;
pub mod redirect;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod supervise;
pub mod testing;
pub mod types;
pub mod verify;

pub use config::OrchestratorConfig;
pub use error::{
    AllocationError, CaptureWriteError, CleanupFailure, RuleApplyError, ServiceHealthError,
    ServiceStartError, SessionError, VerificationError,
};
pub use session::{Collaborators, Orchestrator, SessionOptions, SessionStatus};
pub use store::CredentialLog;
pub use types::{
    CapturedCredential, EncryptionKind, InterfaceCaps, InterfaceInfo, InterfaceMode, Phase, Role,
    RoleAssignment, SessionId, TargetAp, VerificationStatus,
};
