//! Actor kinds shipped with the host.
//!
//! | kind        | component exercised                 |
//! |-------------|-------------------------------------|
//! | `retry`     | `RetryableTask`                     |
//! | `follow_up` | single-flight follow-up scheduling  |
//! | `approval`  | human review gate                   |

mod approval;
mod follow_up;
mod retry_job;

pub use approval::{ApprovalActor, DECISIONS_TABLE};
pub use follow_up::{FollowUpActor, FOLLOW_UPS_TABLE};
pub use retry_job::RetryJobActor;

use crate::actor::ActorRegistry;

pub fn register_builtin(registry: ActorRegistry) -> ActorRegistry {
    registry
        .register(retry_job::KIND, retry_job::create)
        .register(follow_up::KIND, follow_up::create)
        .register(approval::KIND, approval::create)
}
