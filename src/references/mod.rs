mod reference_grants_resolver;

pub use reference_grants_resolver::{grant_permits, FromResourceKey, ReferenceGrantsResolver, ToResourceKey};
