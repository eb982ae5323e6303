mod route_listener_matcher;

pub use route_listener_matcher::{AttachmentVerdict, RouteListenerMatcher};
#[cfg(test)]
pub(crate) use route_listener_matcher::tests;
