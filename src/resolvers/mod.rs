//! Lookups the firewall delegates to the outside world.
//!
//! Country resolution and DNS are collaborators: the engine only talks to
//! the traits below, so hosts can plug in their own geolocation database or
//! resolver.

mod dns;
mod geo;

pub use dns::{DnsResolver, HostResolver};
pub use geo::{GeoResolver, NetworkGeoResolver, NullGeoResolver};

#[cfg(test)]
pub use dns::MockHostResolver;
#[cfg(test)]
pub use geo::MockGeoResolver;
