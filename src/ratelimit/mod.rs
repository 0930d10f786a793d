//! Admission control: identities, policies, counter stores and the engine
//! that ties them together.

mod clock;
mod engine;
mod identity;
mod local;
mod policy;
mod shared;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{AdmissionEngine, Decision};
pub use identity::Identity;
pub use local::LocalStore;
pub use policy::{Policy, PolicyRegistry, MAX_LIMIT, MAX_POLICY_DURATION};
pub use shared::SharedStore;
pub use store::{Admission, CounterStore, StoreError};
