//! Lobby membership and the match start transition.

pub mod matches;
pub mod membership;
