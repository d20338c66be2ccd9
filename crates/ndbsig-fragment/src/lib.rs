//! ndbsig-fragment — splitting oversized signals into fragment trains,
//! reassembling them, and cleaning up after failed peers.

pub mod assembler;
pub mod cleanup;
pub mod context;
pub mod local;
pub mod scheduler;
pub mod sender;
pub mod signal;

pub use assembler::{Assembly, FragmentAssembler, FragmentKey, Sweep};
pub use cleanup::{CleanupCallback, CleanupStep, CleanupTask};
pub use context::{ExecutionContext, FragmentSettings};
pub use local::{Delivery, LocalTransport};
pub use scheduler::{Continuation, RunQueue, SelfScheduler};
pub use sender::{
    FragmentSender, FragmentStep, Progress, SendCallback, SendError, SendId, SendList, SendOutcome,
    SendRequest, SendSections, SendStatus,
};
pub use signal::{
    DeliveredSignal, DroppedSignal, IncomingSignal, OutgoingSignal, SectionPayload,
    SignalDroppedRep, SignalTransport,
};
