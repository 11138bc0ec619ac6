//! Photo-to-style transformation workflow.
//!
//! A [`Workflow`] walks one user from category selection through photo and
//! style pick, runs the resulting transforms on a worker pool and keeps the
//! keyed results, retries and chat notes consistent across resets.

pub mod auth;
pub mod config;
pub mod error;
pub mod gallery;
pub mod gate;
pub mod photo;
pub mod pool;
pub mod results;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod transform;
pub mod workflow;

pub use auth::{SessionAuthority, StaticAuthority};
pub use config::WorkflowConfig;
pub use error::WorkflowError;
pub use gallery::{DirectoryGallery, GallerySink};
pub use gate::{GuideHint, PairReady, SelectionGate};
pub use photo::Photo;
pub use pool::{JobCompletion, JobOrigin, JobTicket, WorkerPool};
pub use results::ResultStore;
pub use retry::RetryCoordinator;
pub use scheduler::BatchJobScheduler;
pub use session::{Screen, SessionStateMachine};
pub use transform::{
    default_transformer_registry, DryrunTransformer, HttpTransformer, HttpTransformerConfig,
    StyleTransformer, TransformRequest, TransformerRegistry,
};
pub use workflow::{Workflow, WorkflowStats};
