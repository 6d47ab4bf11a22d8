//! # schedcheck-harness
//!
//! Collaborators the run orchestrator drives: fixture provisioning, credential
//! resolution, state polling and scheduler invocation.
//!
//! Each collaborator is a trait with a production implementation that shells
//! out to an external tool (`terraform`, `aws`, the scheduler itself). Tests
//! swap in in-memory fakes.

pub mod credentials;
pub mod invoker;
pub mod poller;
pub mod process;
pub mod provision;

pub use credentials::{AwsCliCredentialSource, CredentialResolver, CredentialSource, EnvSnapshot};
pub use invoker::{LaunchMode, ProcessInvoker, SchedulerInvoker, SchedulerPayload};
pub use poller::{AwsCliStateQuery, PollSettings, StateQuery, UNKNOWN_STATE, wait_for_state};
pub use provision::{OutputNames, ProvisioningBackend, TerraformBackend};
