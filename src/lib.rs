pub mod accumulator;
pub mod config;
pub mod error;
pub mod landmark;
pub mod listener;
pub mod logging;
pub mod mailbox;
pub mod protocol;
pub mod receiver;
pub mod skeleton;
pub mod smoother;
pub mod supervisor;

pub use error::{Error, Result};
pub use landmark::{Landmark, Vec3};
pub use listener::{Listener, ListenerState, StopOutcome};
pub use mailbox::Mailbox;
pub use receiver::PoseReceiver;
pub use supervisor::{ProducerOutcome, ProducerProcess, ShutdownReport, ShutdownSupervisor};
