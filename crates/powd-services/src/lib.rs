pub mod clients;
pub mod encoder;
pub mod engine;
pub mod identity;
pub mod maintenance;
pub mod pow_service;
pub mod pow_types;
pub mod resolver;
pub mod service;
pub mod task_store;

pub use clients::{ClientKey, ClientRegistry};
pub use encoder::ResponseEncoder;
pub use engine::{
    completion_channel, run_completions, CommandEngine, Completion, CompletionSink, EngineError,
    ProofOfWorkEngine,
};
pub use identity::IdentityProvider;
pub use maintenance::{MaintenanceScheduler, SweepSummary};
pub use pow_service::{PowRequestHandler, UNKNOWN_SENDER_REASON};
pub use pow_types::{ProofOfWorkRequest, ProofOfWorkResponse, RequestKind, ResponseStatus};
pub use resolver::{DecryptionResolver, Resolution};
pub use service::CommandHandler;
pub use task_store::{StoreError, Task, TaskCounts, TaskStore};
