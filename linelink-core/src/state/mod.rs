mod link;

pub use link::{LinkPhase, LinkStatus};
